//! Error types for the relay.

use crate::protocol::ErrorBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Every failure a chat request can end in. All of them are terminal for the
/// request they occur in; nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The inbound message was missing or empty.
    #[error("No message provided")]
    Validation,

    /// The inbound body was not valid JSON for a chat request.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// The daemon answered with a non-success status.
    #[error("Ollama API error: {0}")]
    Upstream(u16),

    /// The daemon could not be reached, or the connection broke mid-response.
    #[error("Connection error: {0}")]
    Connection(String),
}

impl RelayError {
    /// HTTP status used when this error is returned as a JSON body.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation | RelayError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) | RelayError::Connection(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Connection(err.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RelayError::Validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RelayError::InvalidBody("eof".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Upstream(404).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::Connection("refused".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_message_carries_status() {
        assert_eq!(RelayError::Upstream(503).to_string(), "Ollama API error: 503");
    }
}
