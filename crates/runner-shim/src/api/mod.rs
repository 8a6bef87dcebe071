// runner-shim/src/api/mod.rs
//! Runner HTTP protocol: /load, /completion, /embedding, /health

pub mod protocol;
pub mod extract;
pub mod load_api;
pub mod completion_api;
pub mod embedding_api;
pub mod health_api;

use axum::{http::{Method, Uri}, response::Response, response::IntoResponse};
use tracing::debug;

use crate::error::RunnerError;
use crate::metrics;

pub use load_api::load_model;
pub use completion_api::completion;
pub use embedding_api::embedding;
pub use health_api::health;

/// Fallback for unknown paths and for known paths with the wrong method.
pub async fn not_found(method: Method, uri: Uri) -> Response {
    debug!("No route for {} {}", method, uri.path());
    let err = RunnerError::NotFound;
    metrics::inc_request("not_found", err.status_code());
    err.into_response()
}
