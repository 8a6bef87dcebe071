// runner-shim/src/lib.rs

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model_runtime;
pub mod server;
pub mod shared_state;
pub mod telemetry;

// Public API exports
pub use config::Config;
pub use error::RunnerError;
pub use model_runtime::{InferenceEngine, LoadedModel, ModelManager, ProcessEngine, ServerStatus};
pub use server::{build_router, run_server};
pub use shared_state::AppState;
