use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid transport configuration: {0}")]
    Config(String),

    #[error("Failed to send HTTP request: {0}")]
    Http(String),

    #[error("Table service returned {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Failed to encode or decode table data: {0}")]
    Serialization(String),

    #[error("Transport channel closed: {0}")]
    Closed(String),
}

impl TransportError {
    /// Error code reported by the table service, if this is a service error.
    #[must_use]
    pub fn service_code(&self) -> Option<&str> {
        match self {
            TransportError::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        TransportError::Http(error.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        TransportError::Serialization(error.to_string())
    }
}

impl From<url::ParseError> for TransportError {
    fn from(error: url::ParseError) -> Self {
        TransportError::Config(format!("invalid endpoint URL: {error}"))
    }
}
