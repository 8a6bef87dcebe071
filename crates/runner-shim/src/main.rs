// runner-shim/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use runner_shim::{run_server, Config};

/// Ollama-compatible runner for layer-by-layer inference engines
#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "runner-shim", version, about)]
struct Cli {
    /// Model to load at startup (overrides MODEL_PATH)
    #[arg(long)]
    model: Option<String>,

    /// Port to listen on (overrides RUNNER_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Address to listen on (overrides RUNNER_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Debug logging
    #[arg(long)]
    verbose: bool,

    /// Serve Prometheus metrics on this port (overrides METRICS_PORT)
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[cfg(feature = "cli")]
impl Cli {
    fn apply(self, cfg: &mut Config) {
        if let Some(model) = self.model.filter(|m| !m.is_empty()) {
            cfg.model_path = Some(model);
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(host) = self.host {
            cfg.host = host;
        }
        if self.metrics_port.is_some() {
            cfg.metrics_port = self.metrics_port;
        }
        cfg.verbose |= self.verbose;
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::from_env()?;
    cli.apply(&mut cfg);

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
