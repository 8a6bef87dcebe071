// runner-shim/src/api/embedding_api.rs

use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use tracing::debug;

use super::extract::WireJson;
use super::protocol::{EmbeddingRequest, EmbeddingResponse};
use crate::error::RunnerError;
use crate::metrics;
use crate::shared_state::AppState;

/// POST /embedding
///
/// The engine has no embedding entry point: the vector is all zeros at the
/// configured dimension. Only the token count is real.
pub async fn embedding(
    State(state): State<AppState>,
    WireJson(req): WireJson<EmbeddingRequest>,
) -> Response {
    let request_num = state.counters.inc_embeddings();

    let Some(manager) = &state.manager else {
        let err = RunnerError::NotInitialized;
        metrics::inc_request("embedding", err.status_code());
        return err.into_response();
    };

    let prompt_eval_count = manager.count_tokens(&req.content).await;
    debug!("Embedding request #{}: {} tokens", request_num, prompt_eval_count);

    metrics::inc_request("embedding", StatusCode::OK);
    Json(EmbeddingResponse {
        embedding: vec![0.0; state.config.embedding_dim],
        prompt_eval_count,
    })
    .into_response()
}
