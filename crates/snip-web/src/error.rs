//! Error types for the chat server.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use snip_agent::AgentError;
use snip_agent::wire::StatusBody;

/// Errors raised while building or running a [`ChatServer`](crate::ChatServer).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A configured or extra route cannot be registered.
    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: String },

    /// The accept loop failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ServerError>;

/// A handler failure rendered as `{"status":"error","message":..}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let status = match &err {
            AgentError::NoFlowEnabled { .. } | AgentError::InvalidConfig { .. } => {
                StatusCode::BAD_REQUEST
            }
            AgentError::UnsupportedOnRemote { .. } => StatusCode::NOT_IMPLEMENTED,
            AgentError::ModelUnavailable { .. }
            | AgentError::Http { .. }
            | AgentError::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(status = %self.status, message = %self.message, "request failed");
        (self.status, Json(StatusBody::error(self.message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_errors_map_to_status_codes() {
        let cases = [
            (
                AgentError::NoFlowEnabled {
                    agent: "bob".into(),
                    flow: "ask".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                AgentError::UnsupportedOnRemote {
                    operation: "compress_context".into(),
                },
                StatusCode::NOT_IMPLEMENTED,
            ),
            (
                AgentError::Transport("refused".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AgentError::StreamCancelled {
                    partial: String::new(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn bind_error_names_the_address() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("0.0.0.0:1"));
    }
}
