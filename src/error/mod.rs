use thiserror::Error;

use crate::transport::codec::CodecError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request rejected by server: {0}")]
    Rejected(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Notification center is closed")]
    Closed,
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl ClientError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Config(_) => "config",
            ClientError::Http(_) => "http",
            ClientError::Status { .. } => "status",
            ClientError::Rejected(_) => "rejected",
            ClientError::Validation(_) => "validation",
            ClientError::Transport(_) => "transport",
            ClientError::Protocol(_) => "protocol",
            ClientError::Json(_) => "json",
            ClientError::Closed => "closed",
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_maps_to_protocol() {
        let err: ClientError = CodecError::Empty.into();
        assert_eq!(err.kind(), "protocol");
        assert!(err.to_string().starts_with("Protocol error"));
    }

    #[test]
    fn test_status_error_display() {
        let err = ClientError::Status {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Unexpected HTTP status 503: unavailable");
        assert_eq!(err.kind(), "status");
    }
}
