//! Model runtime
//!
//! - `runtime_trait`: the engine seam (`InferenceEngine`, `LoadedModel`)
//! - `runtime_manager`: the lifecycle state machine around one model
//! - `process_engine`: the engine running as a stdio JSON-lines worker
//! - `format_detector`: layered checkpoint recognition
pub mod runtime_trait;
pub mod runtime_manager;
pub mod process_engine;
pub mod format_detector;
#[cfg(test)]
pub(crate) mod test_support;

pub use runtime_trait::{EngineLoadRequest, GenerationParams, InferenceEngine, LoadOptions, LoadedModel};
pub use runtime_manager::{ModelManager, ProgressReporter, ReadyModel, RunnerSnapshot, ServerStatus};
pub use process_engine::ProcessEngine;
pub use format_detector::FormatDetector;
