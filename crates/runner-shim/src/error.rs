//! Error types for the runner
//!
//! Every failure a request can hit maps onto one `RunnerError` variant, and
//! every variant knows its HTTP status. Handlers return these and axum turns
//! them into `{"error": "..."}` bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// No lifecycle manager was constructed (the engine bridge is unavailable)
    #[error("Model not initialized")]
    NotInitialized,

    /// Body was not parseable JSON
    #[error("Invalid JSON")]
    InvalidJson,

    /// Body parsed but a field is missing or has the wrong shape
    #[error("{0}")]
    InvalidRequest(String),

    /// Completion requested before the model finished loading
    #[error("Model not ready")]
    NotReady,

    /// A commit arrived while another load is still running
    #[error("Model load already in progress")]
    AlreadyLoading,

    /// Engine failure during the background load
    #[error("Failed to load model: {0}")]
    LoadFailed(String),

    /// Engine failure during generation
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RunnerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RunnerError::InvalidJson | RunnerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RunnerError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            RunnerError::AlreadyLoading => StatusCode::CONFLICT,
            RunnerError::NotFound => StatusCode::NOT_FOUND,
            RunnerError::NotInitialized
            | RunnerError::LoadFailed(_)
            | RunnerError::GenerationFailed(_)
            | RunnerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render with an explicit status. `/completion` reports a missing
    /// manager as 503 while the other routes use 500.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&RunnerError> for ErrorBody {
    fn from(err: &RunnerError) -> Self {
        Self { error: err.to_string() }
    }
}

impl IntoResponse for RunnerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        self.into_response_with(status)
    }
}
