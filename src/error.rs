use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Error payload reported by a backend, either tied to a request or unsolicited.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type", default)]
    pub error_type: ServerErrorType,
    pub code: Option<String>,
    pub message: String,
}

impl ServerError {
    #[must_use]
    pub fn new(error_type: ServerErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            code: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend did not acknowledge {0} in time")]
    BackendTimeout(&'static str),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("The session is closed")]
    SessionClosed,

    #[error("Backend error: {0}")]
    Backend(ServerError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] InvalidHeaderValue),

    #[error("Invalid audio frame: {0}")]
    InvalidAudioFrame(String),

    #[error("Invalid chat context: {0}")]
    InvalidChatContext(String),

    #[error("Invalid tool: {0}")]
    InvalidTool(String),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
