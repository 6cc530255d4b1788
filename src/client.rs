use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::transcript::Message;

/// Chunks of the relay's response body, as they arrive.
pub type ByteStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Talks to the local relay, never to the provider directly.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn with_config(config: &ClientConfig) -> Self {
        ChatClient {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        }
    }

    pub fn request_for(&self, messages: &[Message]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        }
    }

    /// Sends the request and hands back the body as a byte stream. A
    /// non-success status fails here, before any body is read.
    pub async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "opening chat stream"
        );

        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("chat relay returned {}", status);
            return Err(ChatError::Status(status.as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Role;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ChatClient {
        ChatClient::with_config(&ClientConfig {
            api_base: format!("{}/api/", server.uri()),
            model: "deepseek/deepseek-r1-0528:free".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
        })
    }

    #[test]
    fn test_request_payload_shape() {
        let client = ChatClient::with_config(&crate::config::Config::default().client);
        let request = client.request_for(&[Message::new(Role::User, "hi")]);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "deepseek/deepseek-r1-0528:free");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hi");
        assert_eq!(value["max_tokens"], 4000);
        assert_eq!(value["stream"], true);
        assert!((value["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_open_stream_yields_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string("data: [DONE]\n"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let request = client.request_for(&[Message::new(Role::User, "hi")]);
        let mut stream = client.open_stream(&request).await.unwrap();

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"data: [DONE]\n");
    }

    #[tokio::test]
    async fn test_open_stream_fails_fast_on_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let request = client.request_for(&[]);
        match client.open_stream(&request).await {
            Err(ChatError::Status(502)) => {}
            other => panic!("expected status error, got {:?}", other.map(|_| ())),
        }
    }
}
