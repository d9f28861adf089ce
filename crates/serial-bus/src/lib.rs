//! USB-serial converter bus
//!
//! Binds pluggable port drivers to the serial ports discovered on a USB
//! device and publishes every bound port as a tty endpoint.
//!
//! # Lifecycle
//!
//! ```text
//! driver module          SerialBus                     EndpointExposer
//! ─────────────          ─────────                     ───────────────
//!   register ──────────►  lookup space
//!                         attach_port(port)
//!                           matches ─► probe
//!                             attach (module held)
//!                             publish ───────────────► ttyMXUSB<N>
//!                         detach_port(port)
//!                           remove
//!                             detach (module held)
//!                             withdraw ──────────────► (gone)
//!   deregister ────────►  HasBoundPorts while any port is bound
//! ```

pub mod bus;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod module;
pub mod port;

pub use bus::{SerialBus, UNKNOWN_DRIVER, matches};
pub use driver::{CallbackError, Driver, DriverId, PortCallback};
pub use endpoint::{Endpoint, EndpointExposer, TtyTable};
pub use error::{BusError, Result};
pub use module::{Module, ModuleHold};
pub use port::Port;
