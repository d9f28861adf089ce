//! Bus error types

use crate::driver::{CallbackError, DriverId};
use thiserror::Error;

const EIO: i32 = 5;
const ENXIO: i32 = 6;
const EBUSY: i32 = 16;
const EEXIST: i32 = 17;
const ENODEV: i32 = 19;

/// Errors surfaced by the binding core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The owning driver is not (or no longer) registered
    #[error("Driver {0} is not registered")]
    NotFound(DriverId),

    #[error("Driver {0} is already registered")]
    AlreadyRegistered(DriverId),

    /// Deregistration refused, these ports are still bound
    #[error("Driver {driver} still has bound ports: {ports:?}")]
    HasBoundPorts { driver: DriverId, ports: Vec<u32> },

    /// The driver's module is unloading and cannot be held
    #[error("Module '{0}' is unavailable")]
    ModuleUnavailable(String),

    #[error("Endpoint for port {0} is already published")]
    DuplicateEndpoint(u32),

    #[error("Port {0} is already bound")]
    AlreadyBound(u32),

    #[error("Port {number} exceeds the minor table (size {minors})")]
    MinorOutOfRange { number: u32, minors: u32 },

    /// Pass-through failure from a driver's attach/detach callback
    #[error("Driver callback failed: {0}")]
    Callback(#[from] CallbackError),
}

impl BusError {
    /// Positive errno equivalent, as reported to the device core
    pub fn errno(&self) -> i32 {
        match self {
            BusError::NotFound(_) => ENODEV,
            BusError::AlreadyRegistered(_) | BusError::DuplicateEndpoint(_) => EEXIST,
            BusError::HasBoundPorts { .. } | BusError::AlreadyBound(_) => EBUSY,
            BusError::ModuleUnavailable(_) => EIO,
            BusError::MinorOutOfRange { .. } => ENXIO,
            BusError::Callback(e) => e.code,
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BusError::HasBoundPorts {
            driver: DriverId::next(),
            ports: vec![3, 7],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("still has bound ports"));
        assert!(msg.contains("[3, 7]"));
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(BusError::NotFound(DriverId::next()).errno(), ENODEV);
        assert_eq!(BusError::ModuleUnavailable("mxu".into()).errno(), EIO);
        assert_eq!(BusError::DuplicateEndpoint(1).errno(), EEXIST);
        assert_eq!(
            BusError::Callback(CallbackError::new(71, "protocol error")).errno(),
            71
        );
    }
}
