//! Logging initialization for embedding binaries.
//!
//! The library itself only emits `tracing` and `log` events; installing a
//! subscriber is the embedder's job. This helper wires up the usual stack:
//! a `LogTracer` bridge so `log` records flow into `tracing`, an env-filter
//! honoring `RUST_LOG`, and a compact fmt layer.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Safe to call more than once; every call
/// after the first is a no-op.
pub fn init(default_directive: &str) {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init();
}
