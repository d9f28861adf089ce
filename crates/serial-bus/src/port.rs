//! Port descriptor

use crate::driver::DriverId;
use std::sync::atomic::{AtomicBool, Ordering};

/// One serial endpoint discovered on a USB-serial device
///
/// Created by discovery with its owning driver already decided; the owner
/// never changes afterwards. `bound` flips to true when a probe succeeds
/// and back to false when the port is removed.
#[derive(Debug)]
pub struct Port {
    number: u32,
    owner: DriverId,
    bound: AtomicBool,
}

impl Port {
    pub fn new(number: u32, owner: DriverId) -> Self {
        Self {
            number,
            owner,
            bound: AtomicBool::new(false),
        }
    }

    /// Port number, doubles as the tty minor
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn owner(&self) -> DriverId {
        self.owner
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub(crate) fn set_bound(&self, bound: bool) {
        self.bound.store(bound, Ordering::Release);
    }
}
