//! Logging setup shared by the binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `level` is used as the filter
/// directive (e.g. `"info"` or `"paperpilot=debug"`).
///
/// # Errors
/// Returns an error if `level` is not a valid filter directive or a global
/// subscriber is already installed.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()?;

    Ok(())
}
