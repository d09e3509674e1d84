use thiserror::Error;

/// Fleet tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Stream transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Request rejected by server: {0}")]
    Rejected(String),

    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Tracker already closed")]
    Closed,
}

impl TrackerError {
    /// Errors worth retrying with the same inputs
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Transport(_) | TrackerError::Request(_) => true,
            TrackerError::Http(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return TrackerError::Http(status.as_u16());
        }
        if err.is_decode() {
            return TrackerError::Decode(err.to_string());
        }
        TrackerError::Request(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TrackerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TrackerError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Io(err.to_string())
    }
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
