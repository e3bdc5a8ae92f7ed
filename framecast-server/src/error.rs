//! Error types for the framecast server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use framecast_core::RegistryError;

/// Errors that can occur when building a router.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No endpoints were configured.
    #[error("No endpoints configured. Call .with_stream() or .with_tasks() before .build()")]
    NoEndpoints,
}

/// Errors returned by the task endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The task id is unknown or its record was evicted.
    #[error("Task not found: {0}")]
    TaskNotFound(String),
}

impl From<RegistryError> for ServerError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::TaskNotFound(id) => ServerError::TaskNotFound(id.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
