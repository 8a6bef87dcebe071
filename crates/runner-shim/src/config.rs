// runner-shim/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_PYTHONPATH: &str = "/usr/share/ollama/airllm:/usr/share/ollama/airllm/air_llm";

/// Outcome of reading `.env`, kept until logging is up.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DotenvStatus {
    #[default]
    Absent,
    Loaded(PathBuf),
    Failed(String),
}

impl DotenvStatus {
    fn from_result(result: dotenvy::Result<PathBuf>) -> Self {
        match result {
            Ok(path) => Self::Loaded(path),
            Err(e) if e.not_found() => Self::Absent,
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Model committed at startup, as if `/load` had been called
    pub model_path: Option<String>,
    pub compression: String,
    pub device: String,
    pub engine_command: String,
    pub engine_script: Option<PathBuf>,
    pub engine_pythonpath: String,
    pub embedding_dim: usize,
    pub metrics_port: Option<u16>,
    pub verbose: bool,
    pub dotenv: DotenvStatus,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            model_path: None,
            compression: "4bit".to_string(),
            device: "cuda:0".to_string(),
            engine_command: "python3".to_string(),
            engine_script: None,
            engine_pythonpath: DEFAULT_PYTHONPATH.to_string(),
            embedding_dim: 768,
            metrics_port: None,
            verbose: false,
            dotenv: DotenvStatus::Absent,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = DotenvStatus::from_result(dotenvy::dotenv());

        let mut cfg = Self::from_lookup(|key| env::var(key).ok())?;
        cfg.dotenv = dotenv;
        Ok(cfg)
    }

    /// Build from any key lookup; unset and empty values take the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            host: get("RUNNER_HOST").unwrap_or(defaults.host),
            port: parse_or(get("RUNNER_PORT"), "RUNNER_PORT", defaults.port)?,
            model_path: get("MODEL_PATH"),
            compression: get("AIRLLM_COMPRESSION").unwrap_or(defaults.compression),
            device: get("AIRLLM_DEVICE").unwrap_or(defaults.device),
            engine_command: get("ENGINE_COMMAND").unwrap_or(defaults.engine_command),
            engine_script: get("ENGINE_SCRIPT").map(PathBuf::from),
            engine_pythonpath: get("ENGINE_PYTHONPATH").unwrap_or(defaults.engine_pythonpath),
            embedding_dim: parse_or(get("EMBEDDING_DIM"), "EMBEDDING_DIM", defaults.embedding_dim)?,
            metrics_port: get("METRICS_PORT")
                .map(|v| v.parse::<u16>().with_context(|| format!("METRICS_PORT: invalid value '{}'", v)))
                .transpose()?,
            verbose: get("RUNNER_VERBOSE")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.verbose),
            dotenv: defaults.dotenv,
        })
    }

    pub fn print_config(&self) {
        match &self.dotenv {
            DotenvStatus::Loaded(path) => info!("Loaded environment variables from {}", path.display()),
            DotenvStatus::Absent => info!("No .env file; using system environment variables"),
            DotenvStatus::Failed(e) => {
                warn!("Failed to load .env file: {}. Using system environment variables.", e)
            }
        }

        info!("Current Configuration:");
        info!("- API: {}:{}", self.host, self.port);
        info!("- Startup Model: {}", self.model_path.as_deref().unwrap_or("(none)"));
        info!("- Compression: {}", self.compression);
        info!("- Device: {}", self.device);
        info!("- Engine Command: {}", self.engine_command);
        info!(
            "- Engine Script: {}",
            self.engine_script
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(search)".to_string())
        );
        info!("- Embedding Dim: {}", self.embedding_dim);
        match self.metrics_port {
            Some(port) => info!("- Metrics: {}:{}", self.host, port),
            None => info!("- Metrics: disabled"),
        }
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        self.socket_addr(self.port)
    }

    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>> {
        self.metrics_port.map(|port| self.socket_addr(port)).transpose()
    }

    fn socket_addr(&self, port: u16) -> Result<SocketAddr> {
        let ip = match self.host.as_str() {
            "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
            host => IpAddr::from_str(host)
                .with_context(|| format!("RUNNER_HOST: invalid address '{}'", host))?,
        };
        if !ip.is_loopback() {
            warn!("Listening on non-loopback address {}; the runner API is unauthenticated", ip);
        }
        Ok(SocketAddr::new(ip, port))
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{}: invalid value '{}'", key, v)),
        None => Ok(default),
    }
}
