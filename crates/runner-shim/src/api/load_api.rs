//! POST /load
//!
//! `commit` starts a background load and answers as soon as it is accepted;
//! the outcome is only visible through `/health`. `close` and any other
//! operation succeed without doing anything.

use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use tracing::{info, warn};

use super::extract::WireJson;
use super::protocol::{LoadRequest, LoadResponse};
use crate::error::RunnerError;
use crate::metrics;
use crate::shared_state::AppState;

pub async fn load_model(
    State(state): State<AppState>,
    WireJson(req): WireJson<LoadRequest>,
) -> Response {
    let request_num = state.counters.inc_loads();
    info!("Load request #{}: operation={}", request_num, req.operation);

    let (status, body) = handle(&state, &req);
    metrics::inc_request("load", status);
    (status, Json(body)).into_response()
}

fn handle(state: &AppState, req: &LoadRequest) -> (StatusCode, LoadResponse) {
    let Some(manager) = &state.manager else {
        let err = RunnerError::NotInitialized;
        return (err.status_code(), LoadResponse::failed(err));
    };

    match req.operation.as_str() {
        "commit" => {
            let model_path = req.model_path();
            if model_path.is_empty() {
                warn!("Commit without model_path");
                return (StatusCode::BAD_REQUEST, LoadResponse::failed("No model path"));
            }
            match manager.start_load(model_path, &state.config.compression, req.load_options()) {
                Ok(()) => (StatusCode::OK, LoadResponse::ok()),
                Err(err) => (err.status_code(), LoadResponse::failed(err)),
            }
        }
        "close" => {
            info!("Close requested; model stays resident");
            (StatusCode::OK, LoadResponse::ok())
        }
        other => {
            warn!("Unknown load operation '{}'; acknowledging", other);
            (StatusCode::OK, LoadResponse::ok())
        }
    }
}
