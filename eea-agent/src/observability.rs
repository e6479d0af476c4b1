//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Guard keeping the tracing infrastructure alive for the program's
/// lifetime.
pub struct TracingGuard(());

/// Initialize tracing. `RUST_LOG` wins when set; otherwise the verbosity
/// count maps to info/debug/trace.
pub fn init_tracing(verbosity: u8) -> Result<TracingGuard> {
    let default_filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(true))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(TracingGuard(()))
}
