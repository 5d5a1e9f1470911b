//! Observability infrastructure: tracing and metrics.
//!
//! Library code only emits `tracing` events and `metrics` samples; binaries
//! embedding the orchestrator call [`init`] once to install a subscriber and
//! pick their own metrics recorder.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Environment variable holding the log filter (falls back to `RUST_LOG`).
pub const LOG_ENV: &str = "STRATUS_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global tracing subscriber and describe core metrics.
///
/// Fails if a global subscriber is already installed.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()?;

    metrics::register_core_metrics();

    tracing::info!("Observability initialized");
    Ok(())
}
