//! Runtime Manager
//!
//! Owns the single model instance and its lifecycle. The whole lifecycle
//! record (status, progress, model path, compression, model handle) is an
//! immutable `RunnerSnapshot` swapped atomically through `ArcSwap`: readers
//! never lock, and writers serialize on a small mutex so a snapshot is always
//! published whole.
//!
//! Only two places publish: `start_load` (Launched/Ready -> LoadingModel) and
//! the background load task it spawns (progress, then Ready or Launched).

use super::runtime_trait::*;
use crate::error::RunnerError;
use crate::metrics;
use arc_swap::ArcSwap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerStatus {
    Launched,
    LoadingModel,
    Ready,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Launched => "launched",
            ServerStatus::LoadingModel => "loadingModel",
            ServerStatus::Ready => "ready",
        }
    }
}

/// One consistent view of the runner.
///
/// `model` is `Some` exactly when `status` is `Ready`.
#[derive(Clone)]
pub struct RunnerSnapshot {
    pub status: ServerStatus,
    pub progress: f32,
    pub model_path: String,
    pub compression: String,
    load_id: u64,
    model: Option<Arc<dyn LoadedModel>>,
}

impl RunnerSnapshot {
    fn launched() -> Self {
        Self {
            status: ServerStatus::Launched,
            progress: 0.0,
            model_path: String::new(),
            compression: String::new(),
            load_id: 0,
            model: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ServerStatus::Ready
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    fn is_loading(&self, load_id: u64) -> bool {
        self.status == ServerStatus::LoadingModel && self.load_id == load_id
    }
}

impl fmt::Debug for RunnerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerSnapshot")
            .field("status", &self.status)
            .field("progress", &self.progress)
            .field("model_path", &self.model_path)
            .field("compression", &self.compression)
            .field("load_id", &self.load_id)
            .field("has_model", &self.model.is_some())
            .finish()
    }
}

struct StateCell {
    current: ArcSwap<RunnerSnapshot>,
    writer: Mutex<()>,
}

impl StateCell {
    fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RunnerSnapshot::launched()),
            writer: Mutex::new(()),
        }
    }

    fn load(&self) -> Arc<RunnerSnapshot> {
        self.current.load_full()
    }

    /// Publish the snapshot `f` derives from the current one. Returns false
    /// (and publishes nothing) when `f` declines.
    fn publish<F>(&self, f: F) -> bool
    where
        F: FnOnce(&RunnerSnapshot) -> Option<RunnerSnapshot>,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load_full();
        match f(&current) {
            Some(next) => {
                self.current.store(Arc::new(next));
                true
            }
            None => false,
        }
    }
}

/// Handed to the engine so it can publish load milestones.
///
/// Reports are clamped to [0.0, 1.0], never move progress backwards, and are
/// dropped once the load they belong to is over.
#[derive(Clone)]
pub struct ProgressReporter {
    cell: Arc<StateCell>,
    load_id: u64,
}

impl ProgressReporter {
    pub fn report(&self, progress: f32) {
        if !progress.is_finite() {
            return;
        }
        let value = progress.clamp(0.0, 1.0);
        let load_id = self.load_id;
        let moved = self.cell.publish(|current| {
            (current.is_loading(load_id) && value > current.progress)
                .then(|| RunnerSnapshot { progress: value, ..current.clone() })
        });
        if moved {
            debug!("Load #{} progress: {:.2}", load_id, value);
        }
    }

    /// A reporter not attached to any runner; every report is ignored.
    pub fn detached() -> Self {
        Self {
            cell: Arc::new(StateCell::new()),
            load_id: 0,
        }
    }
}

/// Whitespace word count used when no tokenizer is loaded.
pub fn approximate_token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub struct ModelManager {
    engine: Arc<dyn InferenceEngine>,
    cell: Arc<StateCell>,
    next_load_id: AtomicU64,
}

impl ModelManager {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        info!("Model manager created with engine: {}", engine.name());
        Self {
            engine,
            cell: Arc::new(StateCell::new()),
            next_load_id: AtomicU64::new(0),
        }
    }

    /// Current state (lock-free read)
    pub fn snapshot(&self) -> Arc<RunnerSnapshot> {
        self.cell.load()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.load().is_ready()
    }

    /// Accept a load and run it in the background.
    ///
    /// Returns as soon as the runner is in `LoadingModel`; the outcome is only
    /// visible through later snapshots. Rejected with `AlreadyLoading` while
    /// another load is running. Starting from `Ready` releases the current
    /// handle from the snapshot; requests already holding it finish with it.
    pub fn start_load(
        &self,
        model_path: &str,
        compression: &str,
        options: LoadOptions,
    ) -> Result<(), RunnerError> {
        let load_id = self.next_load_id.fetch_add(1, Ordering::Relaxed) + 1;

        let accepted = self.cell.publish(|current| {
            if current.status == ServerStatus::LoadingModel {
                return None;
            }
            Some(RunnerSnapshot {
                status: ServerStatus::LoadingModel,
                progress: 0.0,
                model_path: model_path.to_string(),
                compression: compression.to_string(),
                load_id,
                model: None,
            })
        });

        if !accepted {
            warn!("Rejected load of {}: another load is in progress", model_path);
            return Err(RunnerError::AlreadyLoading);
        }

        info!(
            "Load #{} accepted: {} (compression: {}, engine: {})",
            load_id,
            model_path,
            compression,
            self.engine.name()
        );

        let request = EngineLoadRequest {
            model_path: model_path.to_string(),
            compression: compression.to_string(),
            options,
        };
        tokio::spawn(run_load(self.engine.clone(), self.cell.clone(), load_id, request));

        Ok(())
    }

    /// Capture the loaded model. Fails with `NotReady` unless the runner is
    /// `Ready`; the returned handle stays usable if a reload starts later.
    pub fn acquire(&self) -> Result<ReadyModel, RunnerError> {
        let snapshot = self.cell.load();
        match (&snapshot.status, &snapshot.model) {
            (ServerStatus::Ready, Some(model)) => Ok(ReadyModel { model: model.clone() }),
            _ => Err(RunnerError::NotReady),
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, RunnerError> {
        self.acquire()?.generate(prompt, params).await
    }

    /// Token count via the loaded tokenizer, or a whitespace word count when
    /// no model is loaded.
    pub async fn count_tokens(&self, text: &str) -> usize {
        match self.acquire() {
            Ok(model) => model.count_tokens(text).await,
            Err(_) => approximate_token_count(text),
        }
    }
}

#[derive(Clone)]
pub struct ReadyModel {
    model: Arc<dyn LoadedModel>,
}

impl ReadyModel {
    pub async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, RunnerError> {
        debug!(
            "Generating: {} prompt chars, max_new_tokens={}, temperature={}, top_p={}, stop={:?}",
            prompt.len(),
            params.max_new_tokens,
            params.temperature,
            params.top_p,
            params.stop_sequences
        );

        self.model.generate(prompt, params).await.map_err(|e| {
            error!("Generation error: {:#}", e);
            RunnerError::GenerationFailed(format!("{:#}", e))
        })
    }

    /// Falls back to a word count if the tokenizer call fails.
    pub async fn count_tokens(&self, text: &str) -> usize {
        match self.model.count_tokens(text).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Tokenizer failed, falling back to word count: {:#}", e);
                approximate_token_count(text)
            }
        }
    }
}

async fn run_load(
    engine: Arc<dyn InferenceEngine>,
    cell: Arc<StateCell>,
    load_id: u64,
    request: EngineLoadRequest,
) {
    let model_path = request.model_path.clone();
    let reporter = ProgressReporter {
        cell: cell.clone(),
        load_id,
    };
    let started = Instant::now();

    let outcome = match AssertUnwindSafe(engine.load(request, reporter)).catch_unwind().await {
        Ok(Ok(model)) => Ok(model),
        Ok(Err(e)) => Err(RunnerError::LoadFailed(format!("{:#}", e))),
        Err(panic) => Err(RunnerError::LoadFailed(format!(
            "engine panicked: {}",
            panic_message(panic.as_ref())
        ))),
    };

    match outcome {
        Ok(model) => {
            // progress must read 1.0 before Ready can be observed
            cell.publish(|current| {
                current
                    .is_loading(load_id)
                    .then(|| RunnerSnapshot { progress: 1.0, ..current.clone() })
            });
            let published = cell.publish(move |current| {
                current.is_loading(load_id).then(|| RunnerSnapshot {
                    status: ServerStatus::Ready,
                    progress: 1.0,
                    model: Some(model),
                    ..current.clone()
                })
            });

            if published {
                metrics::record_load("ok");
                info!(
                    "Load #{} finished: {} ready after {:.1}s",
                    load_id,
                    model_path,
                    started.elapsed().as_secs_f64()
                );
            } else {
                warn!("Load #{} finished but was superseded; discarding model", load_id);
            }
        }
        Err(err) => {
            cell.publish(|current| {
                current.is_loading(load_id).then(|| RunnerSnapshot {
                    status: ServerStatus::Launched,
                    progress: 0.0,
                    model_path: String::new(),
                    model: None,
                    ..current.clone()
                })
            });
            metrics::record_load("error");
            error!("Load #{} of {} failed: {}", load_id, model_path, err);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
