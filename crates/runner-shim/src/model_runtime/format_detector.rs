//! Model layout detection
//!
//! Recognizes layered (safetensors / transformers) checkpoint directories
//! before the engine is asked to load them.
use std::fs;
use std::path::Path;
use tracing::info;

/// Set to `1` or `true` (any case) to accept any layout.
pub const FORCE_ENV: &str = "OLLAMA_USE_AIRLLM";

const CONFIG_MARKERS: [&str; 3] = ["safetensors", "torch_dtype", "transformers"];

pub struct FormatDetector;

impl FormatDetector {
    /// True when `path` looks like a layered checkpoint, or detection is forced
    /// through the environment.
    pub fn is_layered_checkpoint(path: &Path) -> bool {
        Self::detect(path, std::env::var(FORCE_ENV).ok().as_deref())
    }

    fn detect(path: &Path, force: Option<&str>) -> bool {
        if Self::has_layered_files(path) {
            info!("Detected layered checkpoint at {}", path.display());
            return true;
        }
        force.is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true"))
    }

    fn has_layered_files(path: &Path) -> bool {
        if !path.is_dir() {
            return false;
        }

        if path.join("model.safetensors.index.json").is_file() {
            return true;
        }

        let has_shard = fs::read_dir(path)
            .map(|entries| {
                entries.filter_map(Result::ok).any(|entry| {
                    entry.path().extension().and_then(|e| e.to_str()) == Some("safetensors")
                })
            })
            .unwrap_or(false);
        if has_shard {
            return true;
        }

        fs::read_to_string(path.join("config.json"))
            .map(|content| {
                let content = content.to_ascii_lowercase();
                CONFIG_MARKERS.iter().any(|marker| content.contains(marker))
            })
            .unwrap_or(false)
    }
}
