//! Character-device endpoints for bound ports

use crate::error::{BusError, Result};
use crate::port::Port;
use common::TtySettings;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Publishes and withdraws the endpoint of a bound port
///
/// Implementations must accept concurrent calls for distinct port numbers.
pub trait EndpointExposer: Send + Sync {
    /// Publish the endpoint for `number`, `DuplicateEndpoint` if it exists
    fn publish(&self, number: u32, port: &Arc<Port>) -> Result<()>;

    /// Withdraw the endpoint for `number`; a no-op when nothing is published
    fn withdraw(&self, number: u32);

    /// Display name of the endpoint for `number`
    fn device_name(&self, number: u32) -> String {
        format!("port{}", number)
    }

    /// Port currently published under `number`, if the exposer tracks it
    fn published_port(&self, _number: u32) -> Option<Arc<Port>> {
        None
    }
}

/// A published endpoint
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub number: u32,
    pub port: Arc<Port>,
}

/// In-memory tty minor table
pub struct TtyTable {
    name_prefix: String,
    minors: u32,
    endpoints: Mutex<BTreeMap<u32, Endpoint>>,
}

impl TtyTable {
    pub fn new(name_prefix: impl Into<String>, minors: u32) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            minors,
            endpoints: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_settings(settings: &TtySettings) -> Self {
        Self::new(settings.name_prefix.clone(), settings.minors)
    }

    pub fn lookup(&self, number: u32) -> Option<Endpoint> {
        self.endpoints().get(&number).cloned()
    }

    pub fn is_published(&self, number: u32) -> bool {
        self.endpoints().contains_key(&number)
    }

    /// Names of all published endpoints, ordered by minor
    pub fn names(&self) -> Vec<String> {
        self.endpoints().values().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints().is_empty()
    }

    fn endpoints(&self) -> MutexGuard<'_, BTreeMap<u32, Endpoint>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TtyTable {
    fn default() -> Self {
        Self::from_settings(&TtySettings::default())
    }
}

impl EndpointExposer for TtyTable {
    fn publish(&self, number: u32, port: &Arc<Port>) -> Result<()> {
        if number >= self.minors {
            return Err(BusError::MinorOutOfRange {
                number,
                minors: self.minors,
            });
        }

        let mut endpoints = self.endpoints();
        if endpoints.contains_key(&number) {
            return Err(BusError::DuplicateEndpoint(number));
        }

        let name = self.device_name(number);
        debug!("Publishing {}", name);
        endpoints.insert(
            number,
            Endpoint {
                name,
                number,
                port: Arc::clone(port),
            },
        );
        Ok(())
    }

    fn withdraw(&self, number: u32) {
        if let Some(endpoint) = self.endpoints().remove(&number) {
            debug!("Withdrew {}", endpoint.name);
        }
    }

    fn device_name(&self, number: u32) -> String {
        format!("{}{}", self.name_prefix, number)
    }

    fn published_port(&self, number: u32) -> Option<Arc<Port>> {
        self.endpoints().get(&number).map(|e| Arc::clone(&e.port))
    }
}
