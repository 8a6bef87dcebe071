//! Shared state handed to every handler
//!
//! The lifecycle manager is created once at startup and shared by reference;
//! it is `None` when the engine bridge could not be set up, in which case
//! the handlers answer with `NotInitialized` (health still answers).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{config::Config, model_runtime::ModelManager};

#[derive(Clone)]
pub struct AppState {
    pub manager: Option<Arc<ModelManager>>,
    /// Read-only after startup
    pub config: Arc<Config>,
    pub counters: Arc<RequestCounters>,
}

impl AppState {
    pub fn new(manager: Option<Arc<ModelManager>>, config: Config) -> Self {
        Self {
            manager,
            config: Arc::new(config),
            counters: Arc::new(RequestCounters::default()),
        }
    }
}

/// Per-route request numbering used in logs
#[derive(Default)]
pub struct RequestCounters {
    pub loads: AtomicUsize,
    pub completions: AtomicUsize,
    pub embeddings: AtomicUsize,
}

impl RequestCounters {
    pub fn inc_loads(&self) -> usize {
        self.loads.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_completions(&self) -> usize {
        self.completions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_embeddings(&self) -> usize {
        self.embeddings.fetch_add(1, Ordering::Relaxed) + 1
    }
}
