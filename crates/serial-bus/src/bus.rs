//! Binding registry for the USB-serial bus
//!
//! The [`SerialBus`] owns the driver lookup space and sequences the
//! per-port lifecycle:
//!
//! - `probe`: attach callback under a module hold, then publish the
//!   endpoint. All or nothing: a failure leaves the port unbound with no
//!   endpoint.
//! - `remove`: detach callback under a module hold, then withdraw the
//!   endpoint. Best effort: the port's endpoint is always withdrawn and
//!   the port always ends unbound, even when detach fails or panics.
//!
//! Callbacks never run with a bus lock held. Each registered driver has a
//! slot whose state lock covers both "still registered" and "which ports
//! are bound", so a deregistration and a probe committing on the same
//! driver see each other.

use crate::driver::{Driver, DriverId};
use crate::endpoint::{EndpointExposer, TtyTable};
use crate::error::{BusError, Result};
use crate::port::Port;
use common::BusConfig;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::{debug, info, warn};

/// Label used in log output when a port's driver cannot be resolved
pub const UNKNOWN_DRIVER: &str = "unknown driver";

/// True iff `port` is owned by `driver`
///
/// Pure and lock-free, safe to call speculatively from any thread.
pub fn matches(port: &Port, driver: &Driver) -> bool {
    port.owner() == driver.id()
}

struct DriverSlot {
    driver: Arc<Driver>,
    state: Mutex<SlotState>,
}

struct SlotState {
    registered: bool,
    bound: BTreeMap<u32, Arc<Port>>,
}

impl DriverSlot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SerialBus {
    name: String,
    drivers: RwLock<HashMap<DriverId, Arc<DriverSlot>>>,
    endpoints: Arc<dyn EndpointExposer>,
}

impl SerialBus {
    pub fn new(name: impl Into<String>, endpoints: Arc<dyn EndpointExposer>) -> Self {
        Self {
            name: name.into(),
            drivers: RwLock::new(HashMap::new()),
            endpoints,
        }
    }

    /// Build a bus publishing into a [`TtyTable`] sized by the configuration
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(
            config.bus.name.clone(),
            Arc::new(TtyTable::from_settings(&config.tty)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &Arc<dyn EndpointExposer> {
        &self.endpoints
    }

    /// Add a driver to the lookup space
    pub fn register(&self, driver: Arc<Driver>) -> Result<()> {
        let mut drivers = self.drivers_mut();
        let id = driver.id();
        if drivers.contains_key(&id) {
            warn!(
                "{}: driver '{}' ({}) is already registered",
                self.name,
                driver.description(),
                id
            );
            return Err(BusError::AlreadyRegistered(id));
        }

        info!(
            "{}: registered driver '{}' ({})",
            self.name,
            driver.description(),
            id
        );
        drivers.insert(
            id,
            Arc::new(DriverSlot {
                driver,
                state: Mutex::new(SlotState {
                    registered: true,
                    bound: BTreeMap::new(),
                }),
            }),
        );
        Ok(())
    }

    /// Remove a driver from the lookup space
    ///
    /// Fails with `HasBoundPorts` while any of its ports is bound; the
    /// driver then stays registered. Once this returns `Ok`, every probe
    /// resolving `id` fails with `NotFound`.
    pub fn deregister(&self, id: DriverId) -> Result<Arc<Driver>> {
        let mut drivers = self.drivers_mut();
        let slot = drivers.get(&id).cloned().ok_or(BusError::NotFound(id))?;

        let mut state = slot.state();
        if !state.bound.is_empty() {
            let ports: Vec<u32> = state.bound.keys().copied().collect();
            warn!(
                "{}: refusing to deregister '{}', ports {:?} still bound",
                self.name,
                slot.driver.description(),
                ports
            );
            return Err(BusError::HasBoundPorts { driver: id, ports });
        }
        state.registered = false;
        drop(state);

        drivers.remove(&id);
        info!(
            "{}: deregistered driver '{}' ({})",
            self.name,
            slot.driver.description(),
            id
        );
        Ok(Arc::clone(&slot.driver))
    }

    /// Unbind every port of the driver, then deregister it
    ///
    /// Detach failures are logged and do not stop the unbinding. Ports
    /// bound by probes that commit while this runs are unbound too; the
    /// loop only ends once the driver is gone from the lookup space.
    pub fn force_deregister(&self, id: DriverId) -> Result<Arc<Driver>> {
        loop {
            let ports: Vec<Arc<Port>> = {
                let slot = self.resolve(id).ok_or(BusError::NotFound(id))?;
                let state = slot.state();
                state.bound.values().cloned().collect()
            };

            for port in &ports {
                if let Err(e) = self.remove(port) {
                    warn!(
                        "{}: detach of port {} failed during forced deregistration: {}",
                        self.name,
                        port.number(),
                        e
                    );
                }
            }

            match self.deregister(id) {
                Err(BusError::HasBoundPorts { ports, .. }) => {
                    debug!(
                        "{}: ports {:?} bound during forced deregistration, retrying",
                        self.name, ports
                    );
                }
                other => return other,
            }
        }
    }

    /// Bind `port` to its owning driver and publish its endpoint
    pub fn probe(&self, port: &Arc<Port>) -> Result<()> {
        let number = port.number();
        if port.is_bound() {
            warn!("{}: port {} is already bound", self.name, number);
            return Err(BusError::AlreadyBound(number));
        }

        let slot = self.resolve(port.owner()).ok_or_else(|| {
            debug!("{}: no driver for port {}", self.name, number);
            BusError::NotFound(port.owner())
        })?;
        let driver = &slot.driver;

        if let Err(e) = driver.attach_port(port) {
            warn!(
                "{}: '{}' failed to attach port {}: {}",
                self.name,
                driver.description(),
                number,
                e
            );
            return Err(e);
        }

        let committed = {
            let mut state = slot.state();
            if !state.registered {
                Err(BusError::NotFound(driver.id()))
            } else {
                self.endpoints.publish(number, port).map(|()| {
                    state.bound.insert(number, Arc::clone(port));
                    port.set_bound(true);
                })
            }
        };

        if let Err(e) = committed {
            warn!(
                "{}: could not bind port {} to '{}': {}",
                self.name,
                number,
                driver.description(),
                e
            );
            self.roll_back(driver, port);
            return Err(e);
        }

        info!(
            "{} converter now attached to {}",
            driver.description(),
            self.endpoints.device_name(number)
        );
        Ok(())
    }

    /// Unbind `port` and withdraw its endpoint
    ///
    /// The endpoint is withdrawn and the port marked unbound whatever the
    /// detach callback returns; its error, if any, is returned afterwards.
    pub fn remove(&self, port: &Arc<Port>) -> Result<()> {
        let slot = self.resolve(port.owner());

        // A panicking detach still leaves the port unbound before the panic resumes
        let detached =
            panic::catch_unwind(AssertUnwindSafe(|| self.detach(slot.as_deref(), port)));
        self.unbind(slot.as_deref(), port);
        detached.unwrap_or_else(|payload| panic::resume_unwind(payload))
    }

    fn detach(&self, slot: Option<&DriverSlot>, port: &Port) -> Result<()> {
        let Some(slot) = slot else {
            debug!(
                "{}: driver of port {} is gone, skipping detach",
                self.name,
                port.number()
            );
            return Ok(());
        };

        let result = slot.driver.detach_port(port);
        if let Err(e) = &result {
            warn!(
                "{}: detach of port {} failed: {}",
                self.name,
                port.number(),
                e
            );
        }
        result
    }

    /// Withdraw the endpoint and drop the binding of `port`
    ///
    /// An endpoint or bound-set entry under the same number that belongs
    /// to another bound port is left untouched.
    fn unbind(&self, slot: Option<&DriverSlot>, port: &Arc<Port>) {
        let number = port.number();

        let foreign = self
            .endpoints
            .published_port(number)
            .is_some_and(|owner| !Arc::ptr_eq(&owner, port) && owner.is_bound());
        if foreign {
            debug!(
                "{}: endpoint {} belongs to another port, not withdrawing",
                self.name,
                self.endpoints.device_name(number)
            );
        } else {
            self.endpoints.withdraw(number);
        }

        if let Some(slot) = slot {
            let mut state = slot.state();
            if state
                .bound
                .get(&number)
                .is_some_and(|entry| Arc::ptr_eq(entry, port))
            {
                state.bound.remove(&number);
            }
        }
        port.set_bound(false);

        let description = slot.map_or(UNKNOWN_DRIVER, |slot| slot.driver.description());
        info!(
            "{} converter now disconnected from {}",
            description,
            self.endpoints.device_name(number)
        );
    }

    /// Hand a newly discovered port to the first registered driver that matches
    ///
    /// Returns `Ok(false)` when no registered driver claims the port.
    pub fn attach_port(&self, port: &Arc<Port>) -> Result<bool> {
        let claimed = self
            .drivers()
            .values()
            .any(|slot| matches(port, &slot.driver));

        if !claimed {
            debug!(
                "{}: no registered driver claims port {}",
                self.name,
                port.number()
            );
            return Ok(false);
        }

        self.probe(port).map(|()| true)
    }

    /// Tear down a port that disappeared; unbound ports are left alone
    pub fn detach_port(&self, port: &Arc<Port>) -> Result<bool> {
        if !port.is_bound() {
            return Ok(false);
        }
        self.remove(port).map(|()| true)
    }

    pub fn is_registered(&self, id: DriverId) -> bool {
        self.drivers().contains_key(&id)
    }

    pub fn driver(&self, id: DriverId) -> Option<Arc<Driver>> {
        self.resolve(id).map(|slot| Arc::clone(&slot.driver))
    }

    pub fn driver_count(&self) -> usize {
        self.drivers().len()
    }

    /// Numbers of the ports currently bound to `id`
    pub fn bound_ports(&self, id: DriverId) -> Vec<u32> {
        let Some(slot) = self.resolve(id) else {
            return Vec::new();
        };
        let state = slot.state();
        state.bound.keys().copied().collect()
    }

    /// Undo a successful attach whose commit failed
    fn roll_back(&self, driver: &Driver, port: &Port) {
        if let Err(e) = driver.detach_port(port) {
            warn!(
                "{}: rollback detach of port {} failed: {}",
                self.name,
                port.number(),
                e
            );
        }
    }

    fn resolve(&self, id: DriverId) -> Option<Arc<DriverSlot>> {
        self.drivers().get(&id).cloned()
    }

    fn drivers(&self) -> RwLockReadGuard<'_, HashMap<DriverId, Arc<DriverSlot>>> {
        self.drivers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn drivers_mut(&self) -> RwLockWriteGuard<'_, HashMap<DriverId, Arc<DriverSlot>>> {
        self.drivers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
