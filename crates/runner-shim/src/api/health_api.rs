use axum::{extract::State, http::StatusCode, Json};

use super::protocol::HealthResponse;
use crate::metrics;
use crate::model_runtime::ServerStatus;
use crate::shared_state::AppState;

/// GET /health. Never fails; without a manager the runner reports `launched`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    metrics::inc_request("health", StatusCode::OK);

    let body = match &state.manager {
        Some(manager) => {
            let snapshot = manager.snapshot();
            HealthResponse {
                status: snapshot.status,
                progress: snapshot.progress,
            }
        }
        None => HealthResponse {
            status: ServerStatus::Launched,
            progress: 0.0,
        },
    };
    Json(body)
}
