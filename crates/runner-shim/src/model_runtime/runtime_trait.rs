use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::runtime_manager::ProgressReporter;

/// Load-time knobs forwarded verbatim to the engine.
///
/// These mirror the fields the supervisor sends on `/load`; the runner does
/// not interpret them beyond applying defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub lora_paths: Vec<String>,
    pub projector_path: String,
    pub parallel: u32,
    pub batch_size: u32,
    pub kv_size: u32,
    pub kv_cache_type: String,
    pub flash_attention: String,
    pub num_threads: u32,
    pub multi_user_cache: bool,
    pub gpu_layers: Vec<serde_json::Value>,
    pub main_gpu: i32,
    pub use_mmap: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            lora_paths: Vec::new(),
            projector_path: String::new(),
            parallel: 1,
            batch_size: 512,
            kv_size: 4096,
            kv_cache_type: String::new(),
            flash_attention: "auto".to_string(),
            num_threads: 4,
            multi_user_cache: false,
            gpu_layers: Vec::new(),
            main_gpu: 0,
            use_mmap: true,
        }
    }
}

/// Everything the engine needs to construct a model.
#[derive(Debug, Clone)]
pub struct EngineLoadRequest {
    pub model_path: String,
    pub compression: String,
    pub options: LoadOptions,
}

/// Decoded sampling parameters for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: i32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            stop_sequences: Vec::new(),
        }
    }
}

/// A constructed model plus its tokenizer.
///
/// Held exclusively by the lifecycle manager; request handlers only reach it
/// through `ModelManager`.
#[async_trait]
pub trait LoadedModel: Send + Sync {
    /// Run one blocking-to-completion generation and return the full text
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String>;

    /// Tokenize `text` with the model's tokenizer and return the token count
    async fn count_tokens(&self, text: &str) -> anyhow::Result<usize>;
}

/// Entry point into the external inference engine.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Construct a model. May take arbitrarily long; progress milestones go
    /// through `progress`.
    async fn load(
        &self,
        request: EngineLoadRequest,
        progress: ProgressReporter,
    ) -> anyhow::Result<Arc<dyn LoadedModel>>;
}
