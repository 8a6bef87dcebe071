//! Server startup
//!
//! Builds the lifecycle manager once, hands it to the router through
//! `AppState`, optionally commits the startup model, and serves until Ctrl-C.
//! Metrics, when enabled, live on their own listener so the runner's route
//! table stays exactly /load, /completion, /embedding and /health.

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    api,
    config::Config,
    metrics,
    model_runtime::{LoadOptions, ModelManager, ProcessEngine},
    shared_state::AppState,
};

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing(cfg.verbose);
    crate::metrics::init_metrics();
    cfg.print_config();

    let manager = match ProcessEngine::from_config(&cfg) {
        Ok(engine) => Some(Arc::new(ModelManager::new(Arc::new(engine)))),
        Err(e) => {
            warn!("Engine bridge unavailable: {:#}", e);
            warn!("Serving without a model manager; loads will report 'Model not initialized'");
            None
        }
    };

    if let (Some(manager), Some(model_path)) = (&manager, &cfg.model_path) {
        info!("Committing startup model: {}", model_path);
        if let Err(e) = manager.start_load(model_path, &cfg.compression, LoadOptions::default()) {
            warn!("Startup model not committed: {}", e);
        }
    }

    let api_addr = cfg.api_addr()?;
    let metrics_addr = cfg.metrics_addr()?;
    let state = AppState::new(manager, cfg);

    if let Some(addr) = metrics_addr {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics listener on {}", addr))?;
        info!("Metrics available at http://{}/metrics", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, metrics_router()).await {
                error!("Metrics listener stopped: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind {}", api_addr))?;
    info!("Runner listening on {}", api_addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Runner stopped");
    Ok(())
}

/// Every path and method outside the four routes falls through to 404.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/load", post(api::load_model).fallback(api::not_found))
        .route("/completion", post(api::completion).fallback(api::not_found))
        .route("/embedding", post(api::embedding).fallback(api::not_found))
        .route("/health", get(api::health).fallback(api::not_found))
        .fallback(api::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics::get_metrics))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
