//! Scripted engine for lifecycle and handler tests.

use super::runtime_manager::{ModelManager, ProgressReporter, ServerStatus};
use super::runtime_trait::*;
use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub struct ScriptedEngine {
    gate: Arc<Semaphore>,
    steps: Vec<f32>,
    load_error: Option<String>,
    panics: bool,
    reply: Result<String, String>,
    loads: AtomicUsize,
    generations: Arc<AtomicUsize>,
    last_request: Mutex<Option<EngineLoadRequest>>,
    last_params: Arc<Mutex<Option<GenerationParams>>>,
}

impl ScriptedEngine {
    /// Loads immediately and replies with a fixed text.
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            steps: Vec::new(),
            load_error: None,
            panics: false,
            reply: Ok("scripted reply".to_string()),
            loads: AtomicUsize::new(0),
            generations: Arc::new(AtomicUsize::new(0)),
            last_request: Mutex::new(None),
            last_params: Arc::new(Mutex::new(None)),
        }
    }

    /// Every load blocks until `release` is called once for it.
    pub fn gated(mut self) -> Self {
        self.gate = Arc::new(Semaphore::new(0));
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.load_error = Some(message.to_string());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn replying(mut self, reply: Result<&str, &str>) -> Self {
        self.reply = reply.map(str::to_string).map_err(str::to_string);
        self
    }

    /// Progress values reported before waiting on the gate.
    pub fn with_steps(mut self, steps: Vec<f32>) -> Self {
        self.steps = steps;
        self
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn generation_count(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<EngineLoadRequest> {
        self.last_request.lock().unwrap().clone()
    }

    pub fn last_params(&self) -> Option<GenerationParams> {
        self.last_params.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn load(
        &self,
        request: EngineLoadRequest,
        progress: ProgressReporter,
    ) -> anyhow::Result<Arc<dyn LoadedModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);

        if self.panics {
            panic!("scripted engine panic");
        }

        for step in &self.steps {
            progress.report(*step);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        self.gate.acquire().await.map_err(|e| anyhow!(e))?.forget();

        if let Some(message) = &self.load_error {
            return Err(anyhow!(message.clone()));
        }

        Ok(Arc::new(ScriptedModel {
            reply: self.reply.clone(),
            generations: self.generations.clone(),
            last_params: self.last_params.clone(),
        }))
    }
}

struct ScriptedModel {
    reply: Result<String, String>,
    generations: Arc<AtomicUsize>,
    last_params: Arc<Mutex<Option<GenerationParams>>>,
}

#[async_trait]
impl LoadedModel for ScriptedModel {
    async fn generate(&self, _prompt: &str, params: &GenerationParams) -> anyhow::Result<String> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());
        self.reply.clone().map_err(|e| anyhow!(e))
    }

    async fn count_tokens(&self, text: &str) -> anyhow::Result<usize> {
        Ok(text.len())
    }
}

pub async fn wait_for_status(manager: &ModelManager, status: ServerStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.snapshot().status != status {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("runner never reached {:?}", status));
}
