//! POST /completion
//!
//! Readiness is checked before anything is sent, so "not ready" is a plain
//! 503. Once the 200 goes out the body is a stream of `CompletionResponse`
//! objects, one per chunk, with no Content-Length; the last one has
//! `done = true`. A generation failure after that point can only be reported
//! in-band, as a terminal object with empty content.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::convert::Infallible;
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::extract::WireJson;
use super::protocol::{CompletionRequest, CompletionResponse, DoneReason};
use crate::error::RunnerError;
use crate::metrics::{self, ActiveCompletion};
use crate::model_runtime::ReadyModel;
use crate::shared_state::AppState;

/// Reported for `prompt_eval_duration`; the engine does not time prompt
/// evaluation separately.
const PROMPT_EVAL_PLACEHOLDER: Duration = Duration::from_millis(100);

pub async fn completion(
    State(state): State<AppState>,
    WireJson(req): WireJson<CompletionRequest>,
) -> Response {
    let request_num = state.counters.inc_completions();
    info!("Completion request #{}: {} prompt chars", request_num, req.prompt.len());

    let Some(manager) = &state.manager else {
        metrics::inc_request("completion", StatusCode::SERVICE_UNAVAILABLE);
        return RunnerError::NotInitialized.into_response_with(StatusCode::SERVICE_UNAVAILABLE);
    };

    let model = match manager.acquire() {
        Ok(model) => model,
        Err(err) => {
            info!("Completion request #{} rejected: {}", request_num, err);
            metrics::inc_request("completion", err.status_code());
            return err.into_response();
        }
    };

    metrics::inc_request("completion", StatusCode::OK);

    let stream = async_stream::stream! {
        let response = run_completion(request_num, &model, &req).await;
        match serde_json::to_vec(&response) {
            Ok(chunk) => yield Ok::<_, Infallible>(Bytes::from(chunk)),
            Err(e) => error!("Failed to encode completion #{}: {}", request_num, e),
        }
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn run_completion(
    request_num: usize,
    model: &ReadyModel,
    req: &CompletionRequest,
) -> CompletionResponse {
    let _active = ActiveCompletion::start();
    let params = req.generation_params();
    let prompt_eval_count = model.count_tokens(&req.prompt).await;

    let started = Instant::now();
    let content = match model.generate(&req.prompt, &params).await {
        Ok(content) => content,
        Err(e) => {
            error!("Completion #{} failed: {}", request_num, e);
            return CompletionResponse::failed();
        }
    };
    let eval_duration = started.elapsed();
    metrics::observe_generation(eval_duration.as_secs_f64());

    let eval_count = model.count_tokens(&content).await;
    info!(
        "Completion #{} done: {} prompt tokens, {} generated tokens in {:.2}s",
        request_num,
        prompt_eval_count,
        eval_count,
        eval_duration.as_secs_f64()
    );

    CompletionResponse {
        content,
        logprobs: Vec::new(),
        done: true,
        done_reason: DoneReason::Stop,
        prompt_eval_count,
        prompt_eval_duration: PROMPT_EVAL_PLACEHOLDER.as_nanos() as u64,
        eval_count,
        eval_duration: eval_duration.as_nanos() as u64,
    }
}
