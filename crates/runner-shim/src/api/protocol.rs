//! Wire types for the runner protocol.
//!
//! Optional request fields are `Option`s so that both a missing key and an
//! explicit `null` fall back to the documented default. Unknown keys are
//! ignored.

use serde::{Deserialize, Serialize};

use crate::model_runtime::{GenerationParams, LoadOptions, ServerStatus};

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    pub operation: String,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub lora_path: Option<Vec<String>>,
    #[serde(default)]
    pub projector_path: Option<String>,
    #[serde(default)]
    pub parallel: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub kv_size: Option<u32>,
    #[serde(default)]
    pub kv_cache_type: Option<String>,
    #[serde(default)]
    pub flash_attention: Option<String>,
    #[serde(default)]
    pub num_threads: Option<u32>,
    #[serde(default)]
    pub multi_user_cache: Option<bool>,
    #[serde(default)]
    pub gpu_layers: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub main_gpu: Option<i32>,
    #[serde(default)]
    pub use_mmap: Option<bool>,
}

impl LoadRequest {
    pub fn model_path(&self) -> &str {
        self.model_path.as_deref().unwrap_or("")
    }

    pub fn load_options(&self) -> LoadOptions {
        let defaults = LoadOptions::default();
        LoadOptions {
            lora_paths: self.lora_path.clone().unwrap_or(defaults.lora_paths),
            projector_path: self.projector_path.clone().unwrap_or(defaults.projector_path),
            parallel: self.parallel.unwrap_or(defaults.parallel),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            kv_size: self.kv_size.unwrap_or(defaults.kv_size),
            kv_cache_type: self.kv_cache_type.clone().unwrap_or(defaults.kv_cache_type),
            flash_attention: self.flash_attention.clone().unwrap_or(defaults.flash_attention),
            num_threads: self.num_threads.unwrap_or(defaults.num_threads),
            multi_user_cache: self.multi_user_cache.unwrap_or(defaults.multi_user_cache),
            gpu_layers: self.gpu_layers.clone().unwrap_or(defaults.gpu_layers),
            main_gpu: self.main_gpu.unwrap_or(defaults.main_gpu),
            use_mmap: self.use_mmap.unwrap_or(defaults.use_mmap),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LoadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl LoadResponse {
    pub fn ok() -> Self {
        Self { success: true, error: String::new() }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self { success: false, error: error.to_string() }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub images: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub grammar: Option<String>,
    #[serde(default)]
    pub options: Option<CompletionOptions>,
    #[serde(default)]
    pub logprobs: Option<bool>,
    #[serde(default)]
    pub top_logprobs: Option<u32>,
    #[serde(default)]
    pub shift: Option<bool>,
    #[serde(default)]
    pub truncate: Option<bool>,
}

/// Sampling options; every key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CompletionOptions {
    #[serde(default)]
    pub num_predict: Option<i32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Option<StopSequences>,
}

/// `stop` may be a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

impl CompletionRequest {
    pub fn generation_params(&self) -> GenerationParams {
        let defaults = GenerationParams::default();
        let Some(options) = &self.options else {
            return defaults;
        };
        GenerationParams {
            max_new_tokens: options.num_predict.unwrap_or(defaults.max_new_tokens),
            temperature: options.temperature.unwrap_or(defaults.temperature),
            top_p: options.top_p.unwrap_or(defaults.top_p),
            stop_sequences: options
                .stop
                .clone()
                .map(StopSequences::into_vec)
                .unwrap_or(defaults.stop_sequences),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DoneReason {
    Stop,
    Length,
    ConnectionClosed,
}

/// One streamed completion object.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub logprobs: Vec<serde_json::Value>,
    pub done: bool,
    pub done_reason: DoneReason,
    pub prompt_eval_count: usize,
    pub prompt_eval_duration: u64,
    pub eval_count: usize,
    pub eval_duration: u64,
}

impl CompletionResponse {
    /// Terminal object for a generation that failed after the stream began.
    pub fn failed() -> Self {
        Self {
            content: String::new(),
            logprobs: Vec::new(),
            done: true,
            done_reason: DoneReason::Stop,
            prompt_eval_count: 0,
            prompt_eval_duration: 0,
            eval_count: 0,
            eval_duration: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    pub prompt_eval_count: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ServerStatus,
    pub progress: f32,
}
