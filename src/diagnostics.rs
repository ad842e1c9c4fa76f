//! Ambient diagnostics: panic/error reporting and `tracing` setup.
//!
//! Distinct from the event log in `eventlog.rs`, which is structured,
//! parseable output; this is for humans debugging the supervisor itself,
//! controlled by `RUST_LOG` and written to stderr.

use color_eyre::eyre::Result;
use tracing_error::ErrorLayer;
use tracing_subscriber::{self, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the panic/error hooks and the tracing subscriber. Must run once,
/// before anything else that might panic or log.
pub fn install() -> Result<()> {
  color_eyre::install()?;

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
  let fmt_layer = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_filter(filter);
  tracing_subscriber::registry()
    .with(fmt_layer)
    .with(ErrorLayer::default())
    .try_init()
    .map_err(|e| color_eyre::eyre::eyre!("failed to install tracing subscriber: {e}"))?;

  Ok(())
}
