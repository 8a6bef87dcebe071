// runner-shim/src/metrics.rs

use prometheus::{Encoder, TextEncoder, Registry, IntCounterVec, IntGauge, Histogram};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use axum::response::{IntoResponse, Response};
use axum::http::{header, StatusCode};
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static LOAD_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_COMPLETIONS: OnceLock<IntGauge> = OnceLock::new();
static GENERATION_TIME: OnceLock<Histogram> = OnceLock::new();

/// Register the runner's metrics. Safe to call more than once; recording
/// before this is a no-op.
pub fn init_metrics() {
    let req_counter = REQ_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("runner_requests_total", "Total requests per route"),
            &["route", "status"]
        ).expect("static metric definition")
    });

    let load_counter = LOAD_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("runner_model_loads_total", "Background model loads by outcome"),
            &["outcome"]
        ).expect("static metric definition")
    });

    let active_completions = ACTIVE_COMPLETIONS.get_or_init(|| {
        IntGauge::new("runner_active_completions", "Completions currently generating")
            .expect("static metric definition")
    });

    let generation_time = GENERATION_TIME.get_or_init(|| {
        Histogram::with_opts(prometheus::HistogramOpts::new(
            "runner_generation_seconds",
            "Wall-clock time spent inside the engine per completion"
        ).buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]))
            .expect("static metric definition")
    });

    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(load_counter.clone())).ok();
    REGISTRY.register(Box::new(active_completions.clone())).ok();
    REGISTRY.register(Box::new(generation_time.clone())).ok();
}

pub fn inc_request(route: &str, status: StatusCode) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status.as_str()]).inc();
    }
}

pub fn record_load(outcome: &str) {
    if let Some(counter) = LOAD_COUNTER.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn observe_generation(seconds: f64) {
    if let Some(histogram) = GENERATION_TIME.get() {
        histogram.observe(seconds);
    }
}

/// Counts one in-flight completion for as long as it is alive, including
/// when the client drops the stream halfway.
pub struct ActiveCompletion(());

impl ActiveCompletion {
    pub fn start() -> Self {
        if let Some(gauge) = ACTIVE_COMPLETIONS.get() {
            gauge.inc();
        }
        Self(())
    }
}

impl Drop for ActiveCompletion {
    fn drop(&mut self) {
        if let Some(gauge) = ACTIVE_COMPLETIONS.get() {
            gauge.dec();
        }
    }
}

pub fn render() -> prometheus::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

pub async fn get_metrics() -> Response {
    match render() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        ).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            crate::error::RunnerError::Internal(e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_families() {
        init_metrics();
        inc_request("health", StatusCode::OK);
        record_load("ok");
        observe_generation(0.25);

        let text = String::from_utf8(render().unwrap()).unwrap();
        assert!(text.contains("runner_requests_total"));
        assert!(text.contains("runner_model_loads_total"));
        assert!(text.contains("runner_generation_seconds"));
    }
}
