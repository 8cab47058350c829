//! Server error types and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use libnanocrud_core::NanocrudError;
use libnanocrud_git::GitError;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the collection layer and the server bootstrap
#[derive(Error, Debug)]
pub enum ServerError {
    /// Missing, empty or reserved collection name
    #[error("invalid collection name: {0}")]
    InvalidName(String),

    /// Store operation failed
    #[error("{0}")]
    Store(NanocrudError),

    /// The data directory could not be put under version control
    #[error("repository bootstrap failed: {0}")]
    RepositoryInit(#[source] GitError),

    /// File watch setup failed
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A blocking task panicked or was cancelled
    #[error("task failed: {0}")]
    Join(String),
}

impl From<NanocrudError> for ServerError {
    fn from(e: NanocrudError) -> Self {
        match e {
            NanocrudError::InvalidName(msg) => ServerError::InvalidName(msg),
            other => ServerError::Store(other),
        }
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(e: tokio::task::JoinError) -> Self {
        ServerError::Join(e.to_string())
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidName(_) => StatusCode::BAD_REQUEST,
            ServerError::Store(NanocrudError::Conflict(_)) => StatusCode::CONFLICT,
            ServerError::Store(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        error_response(status, self.to_string())
    }
}

/// JSON error body: `{statusCode, error, message}`
pub fn error_response(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({
        "statusCode": status.as_u16(),
        "error": status.canonical_reason().unwrap_or("Error"),
        "message": message,
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let name: ServerError = NanocrudError::InvalidName("empty".into()).into();
        assert!(matches!(name, ServerError::InvalidName(_)));
        assert_eq!(name.status(), StatusCode::BAD_REQUEST);

        let args: ServerError = NanocrudError::invalid("bad query").into();
        assert_eq!(args.status(), StatusCode::BAD_REQUEST);

        let conflict: ServerError = NanocrudError::Conflict("dup".into()).into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let io: ServerError = NanocrudError::Io(std::io::Error::other("disk")).into();
        assert_eq!(io.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
