use thiserror::Error;

/// Failures of a chat request against the relay.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("HTTP error! status: {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("could not prepare storage directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored history is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("{0}")]
    Image(#[from] image::ImageError),
    #[error("could not run recognizer: {0}")]
    Io(#[from] std::io::Error),
    #[error("recognizer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("unreadable recognizer output: {0}")]
    Output(String),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("could not start speech recognition: {0}")]
    Start(String),
}
