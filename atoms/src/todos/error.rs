use lambda_http::http::StatusCode;
use thiserror::Error;

/// Failures surfaced by the todo service and its stores
#[derive(Debug, Error)]
pub enum TodoError {
    #[error("Task was not found with: {0}")]
    NotFound(i64),

    /// Request could not be bound to its schema (body, path id, identity header)
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Store(String),
}

impl TodoError {
    pub fn status(&self) -> StatusCode {
        match self {
            TodoError::NotFound(_) => StatusCode::NOT_FOUND,
            TodoError::Validation(_) => StatusCode::BAD_REQUEST,
            TodoError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error kind as written in the JSON error body
    pub fn kind(&self) -> &'static str {
        match self {
            TodoError::NotFound(_) => "NotFound",
            TodoError::Validation(_) => "ValidationError",
            TodoError::Store(_) => "StoreError",
        }
    }
}
