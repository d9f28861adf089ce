//! Common utilities for the mxusbserial workspace
//!
//! Ambient pieces shared by the bus core and anything embedding it:
//! error handling, tracing setup and the TOML bus configuration.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{BusConfig, BusSettings, TtySettings, load_config};
pub use error::{Error, Result};
pub use logging::{setup_logging, setup_logging_from_config};
