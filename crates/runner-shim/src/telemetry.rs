// runner-shim/src/telemetry.rs
//! Log setup. Output goes to stderr so the supervising server can capture it
//! alongside the engine worker's own stderr.

use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

/// Request spans from `TraceLayer` are only interesting when verbose.
const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "h2=warn", "tower_http=warn"];

/// Filter used when `RUST_LOG` is unset or unusable.
fn default_directives(verbose: bool) -> String {
    let mut directives = vec![if verbose { "debug" } else { "info" }.to_string()];
    directives.extend(
        QUIET_DEPENDENCIES
            .iter()
            .filter(|d| !(verbose && d.starts_with("tower_http")))
            .map(|d| d.to_string()),
    );
    directives.join(",")
}

/// `RUST_LOG` wins when it parses; otherwise the runner's defaults. The
/// rejected value is returned so it can be reported once logging is up.
fn build_filter(verbose: bool, rust_log: Option<&str>) -> (EnvFilter, Option<String>) {
    let fallback = || EnvFilter::new(default_directives(verbose));
    match rust_log.map(str::trim).filter(|v| !v.is_empty()) {
        None => (fallback(), None),
        Some(value) => match EnvFilter::try_new(value) {
            Ok(filter) => (filter, None),
            Err(e) => (fallback(), Some(format!("{} ({})", value, e))),
        },
    }
}

pub fn init_tracing(verbose: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let (filter, rejected) = build_filter(verbose, rust_log.as_deref());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(verbose)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return;
    }
    if let Some(rejected) = rejected {
        warn!("Ignoring invalid RUST_LOG={}", rejected);
    }
}
