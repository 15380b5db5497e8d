use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Diagnostics go to stderr so they never
/// interleave with the progress line on stdout; `RUST_LOG` overrides the
/// level picked from `verbose`.
pub fn init(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}
