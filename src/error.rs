use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(reqwest::Error),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("{0}")]
    Validation(String),
    #[error("not logged in")]
    Unauthenticated,
    #[error("no conversation selected")]
    NoActiveConversation,
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("upload failed: {0}")]
    Upload(String),
}

impl ClientError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// True for a 401 from the backend, which invalidates the stored token.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. } | Self::Unauthenticated)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err)
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(err.to_string())
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
