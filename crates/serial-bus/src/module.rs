//! Driver module lifetime and transient holds
//!
//! A [`Module`] stands for the code that provides a driver's callbacks.
//! The bus takes a [`ModuleHold`] around every attach/detach call so the
//! module cannot finish unloading while one of its callbacks is running.
//! Taking a hold never blocks: it either succeeds or fails right away.

use crate::error::{BusError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Top bit of the state word marks the module as unloading
const UNLOADING: usize = 1 << (usize::BITS - 1);

#[derive(Debug)]
pub struct Module {
    name: String,
    /// Outstanding hold count, plus the UNLOADING flag
    state: AtomicUsize,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take a hold on the module, failing if it has started unloading
    pub fn try_hold(&self) -> Result<ModuleHold<'_>> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                if state & UNLOADING != 0 {
                    None
                } else {
                    Some(state + 1)
                }
            })
            .map_err(|_| BusError::ModuleUnavailable(self.name.clone()))?;

        Ok(ModuleHold { module: self })
    }

    /// Number of holds currently outstanding
    pub fn holds(&self) -> usize {
        self.state.load(Ordering::Acquire) & !UNLOADING
    }

    pub fn is_live(&self) -> bool {
        self.state.load(Ordering::Acquire) & UNLOADING == 0
    }

    /// Refuse all future holds
    ///
    /// Returns true when no hold is outstanding, i.e. the module's code
    /// can be released right now.
    pub fn begin_unload(&self) -> bool {
        let previous = self.state.fetch_or(UNLOADING, Ordering::AcqRel);
        debug!(
            "Module '{}' unloading with {} holds outstanding",
            self.name,
            previous & !UNLOADING
        );
        previous & !UNLOADING == 0
    }
}

/// Scoped hold on a [`Module`], released on drop
#[must_use = "the module is only held while the guard is alive"]
#[derive(Debug)]
pub struct ModuleHold<'a> {
    module: &'a Module,
}

impl ModuleHold<'_> {
    pub fn module(&self) -> &Module {
        self.module
    }
}

impl Drop for ModuleHold<'_> {
    fn drop(&mut self) {
        self.module.state.fetch_sub(1, Ordering::AcqRel);
    }
}
