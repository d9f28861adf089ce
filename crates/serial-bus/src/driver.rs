//! Driver descriptor
//!
//! A [`Driver`] is registered once per driver implementation and shared by
//! every port it owns. The bus only ever compares its [`DriverId`]; the
//! attach/detach callbacks are opaque.

use crate::error::Result;
use crate::module::Module;
use crate::port::Port;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_DRIVER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity token, unique per driver implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverId(u64);

impl DriverId {
    /// Allocate a fresh identity
    pub fn next() -> Self {
        Self(NEXT_DRIVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "driver#{}", self.0)
    }
}

/// Failure reported by a driver callback, carried through untouched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct CallbackError {
    pub code: i32,
    pub message: String,
}

impl CallbackError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Per-port lifecycle callback
pub type PortCallback =
    Box<dyn Fn(&Port) -> std::result::Result<(), CallbackError> + Send + Sync>;

pub struct Driver {
    id: DriverId,
    description: String,
    owner: Arc<Module>,
    attach: Option<PortCallback>,
    detach: Option<PortCallback>,
}

impl Driver {
    /// Create a driver without callbacks, owned by a fresh module of the same name
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id: DriverId::next(),
            owner: Module::new(description.clone()),
            description,
            attach: None,
            detach: None,
        }
    }

    /// Set the module whose code provides the callbacks
    pub fn with_owner(mut self, owner: Arc<Module>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_attach<F>(mut self, attach: F) -> Self
    where
        F: Fn(&Port) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.attach = Some(Box::new(attach));
        self
    }

    pub fn with_detach<F>(mut self, detach: F) -> Self
    where
        F: Fn(&Port) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.detach = Some(Box::new(detach));
        self
    }

    pub fn id(&self) -> DriverId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn owner(&self) -> &Arc<Module> {
        &self.owner
    }

    pub fn has_attach(&self) -> bool {
        self.attach.is_some()
    }

    pub fn has_detach(&self) -> bool {
        self.detach.is_some()
    }

    /// Run the attach callback under a module hold; absent callback is a no-op
    pub(crate) fn attach_port(&self, port: &Port) -> Result<()> {
        self.invoke(self.attach.as_ref(), port)
    }

    /// Run the detach callback under a module hold; absent callback is a no-op
    pub(crate) fn detach_port(&self, port: &Port) -> Result<()> {
        self.invoke(self.detach.as_ref(), port)
    }

    fn invoke(&self, callback: Option<&PortCallback>, port: &Port) -> Result<()> {
        let Some(callback) = callback else {
            return Ok(());
        };

        let _hold = self.owner.try_hold()?;
        callback(port)?;
        Ok(())
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("owner", &self.owner.name())
            .field("attach", &self.has_attach())
            .field("detach", &self.has_detach())
            .finish()
    }
}
