//! The relay between the client and the provider. It adds the API key and
//! a few attribution headers, and otherwise passes the body through as is.

use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::error::ProxyError;

#[derive(Clone)]
struct RelayState {
    client: reqwest::Client,
    upstream: Arc<str>,
    api_key: Arc<str>,
    referer_fallback: Arc<str>,
    title: Arc<str>,
}

impl RelayState {
    fn with_config(config: &ProxyConfig) -> Self {
        RelayState {
            client: reqwest::Client::new(),
            upstream: format!("{}/chat/completions", config.upstream_base.trim_end_matches('/')).into(),
            api_key: config.api_key.clone().unwrap_or_default().into(),
            referer_fallback: config.referer_fallback.as_str().into(),
            title: config.title.as_str().into(),
        }
    }
}

pub fn build_router(config: &ProxyConfig) -> Router {
    if config.api_key.is_none() {
        tracing::warn!("{} is not set; upstream requests will be rejected", crate::config::API_KEY_ENV);
    }

    Router::new()
        .route("/api/chat", post(chat))
        .fallback_service(ServeDir::new(&config.static_dir))
        .with_state(RelayState::with_config(config))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Binds `host:port` and serves until the process ends.
pub async fn serve(config: ProxyConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {}", addr))?;

    tracing::info!("Server running on port {}", config.port);
    tracing::info!("Open http://localhost:{}/ in your browser", config.port);

    axum::serve(listener, build_router(&config))
        .await
        .context("proxy server stopped")
}

async fn chat(State(state): State<RelayState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    match forward(&state, &headers, &body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "An error occurred" })),
            )
                .into_response()
        }
    }
}

async fn forward(state: &RelayState, headers: &HeaderMap, body: &Value) -> Result<Response, ProxyError> {
    let referer = headers
        .get(header::ORIGIN)
        .and_then(|origin| origin.to_str().ok())
        .unwrap_or(state.referer_fallback.as_ref());

    let upstream = state
        .client
        .post(state.upstream.as_ref())
        .bearer_auth(&state.api_key)
        .header("HTTP-Referer", referer)
        .header("X-Title", state.title.as_ref())
        .json(body)
        .send()
        .await?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    tracing::debug!(%status, "upstream responded");

    if is_truthy(&body["stream"]) {
        let body = Body::from_stream(upstream.bytes_stream());
        return Ok((status, [(header::CONTENT_TYPE, "text/event-stream")], body).into_response());
    }

    let data: Value = upstream.json().await?;
    Ok((status, Json(data)).into_response())
}

/// JSON truthiness the way a browser would judge it.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
