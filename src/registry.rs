//! Device matching registry.
//!
//! The registry binds registered drivers to devices as they appear on the bus
//! and detaches them again when they disappear. Dropping the registry detaches
//! every remaining session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::control::ControlHost;
use crate::driver::KeyboardDriver;
use crate::session::{AttachError, DeviceSession};
use crate::transport::{Bus, DeviceInfo};

pub struct Registry {
    host: Arc<dyn ControlHost>,
    drivers: Vec<&'static dyn KeyboardDriver>,
    sessions: BTreeMap<String, Arc<DeviceSession>>,

    /// Devices that failed to attach, retried only once they reappear.
    failed: BTreeSet<String>,
}

impl Registry {
    pub fn new(host: Arc<dyn ControlHost>) -> Self {
        Self { host, drivers: Vec::new(), sessions: BTreeMap::new(), failed: BTreeSet::new() }
    }

    /// Make a driver available for matching.
    pub fn register(&mut self, driver: &'static dyn KeyboardDriver) {
        info!(driver = driver.name(), "loading driver");
        self.drivers.push(driver);
    }

    /// Remove a driver, detaching all devices bound to it.
    pub fn unregister(&mut self, name: &str) {
        let paths: Vec<_> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.driver().name() == name)
            .map(|(path, _)| path.clone())
            .collect();

        for path in paths {
            self.device_removed(&path);
        }

        self.drivers.retain(|driver| driver.name() != name);
        info!(driver = name, "unloading driver");
    }

    /// Driver responsible for a device.
    pub fn driver_for(&self, device: &DeviceInfo) -> Option<&'static dyn KeyboardDriver> {
        self.drivers.iter().copied().find(|driver| driver.matches(device))
    }

    /// Handle a device appearing on the bus.
    ///
    /// Returns `None` if no driver matches or the device is already bound.
    pub fn device_added(
        &mut self,
        device: &DeviceInfo,
        bus: &dyn Bus,
    ) -> Result<Option<Arc<DeviceSession>>, AttachError> {
        if self.sessions.contains_key(&device.path) {
            return Ok(None);
        }

        let driver = match self.driver_for(device) {
            Some(driver) => driver,
            None => return Ok(None),
        };

        match DeviceSession::attach(device, driver, bus, &self.host) {
            Ok(session) => {
                self.failed.remove(&device.path);
                self.sessions.insert(device.path.clone(), session.clone());
                Ok(Some(session))
            },
            Err(err) => {
                self.failed.insert(device.path.clone());
                Err(err)
            },
        }
    }

    /// Handle a device disappearing from the bus.
    ///
    /// Returns `false` if no session was bound to `path`.
    pub fn device_removed(&mut self, path: &str) -> bool {
        self.failed.remove(path);

        match self.sessions.remove(path) {
            Some(session) => {
                session.detach();
                true
            },
            None => false,
        }
    }

    /// Reconcile sessions with the devices currently present.
    ///
    /// Devices that vanished are detached, new matching devices are attached.
    /// Attach failures are logged and not retried until the device reappears.
    pub fn sync(&mut self, present: &[DeviceInfo], bus: &dyn Bus) {
        let gone: Vec<_> = self
            .sessions
            .keys()
            .chain(self.failed.iter())
            .filter(|path| !present.iter().any(|device| &device.path == *path))
            .cloned()
            .collect();

        for path in gone {
            debug!(%path, "device removed");
            self.device_removed(&path);
        }

        for device in present {
            if self.failed.contains(&device.path) {
                continue;
            }

            if let Err(err) = self.device_added(device, bus) {
                warn!("{err}");
            }
        }
    }

    pub fn session(&self, path: &str) -> Option<&Arc<DeviceSession>> {
        self.sessions.get(path)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Arc<DeviceSession>> {
        self.sessions.values()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let names: Vec<_> = self.drivers.iter().map(|driver| driver.name()).collect();
        for name in names {
            self.unregister(name);
        }
    }
}
