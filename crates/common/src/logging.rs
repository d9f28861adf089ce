//! Logging setup and configuration

use crate::config::BusConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Setup tracing subscriber for the process embedding the bus
///
/// `RUST_LOG` wins over `default_level` when it is set.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Logging already initialised: {}", e)))?;

    Ok(())
}

/// Setup tracing at the level named by `[bus] log_level`
pub fn setup_logging_from_config(config: &BusConfig) -> crate::Result<()> {
    setup_logging(&config.bus.log_level)
}
