//! Tracing Setup
//!
//! Installs the process-wide `tracing` subscriber. The log level comes from
//! `LOG_LEVEL` (default `info`); a set `RUST_LOG` takes precedence for
//! per-target filtering.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing from the environment.
///
/// Must be called once at startup before any component task is spawned.
/// Subsequent calls are no-ops.
pub fn init_from_env() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
