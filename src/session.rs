//! Attached keyboard lifecycle.
//!
//! A session moves through `Disconnected → Attaching → Active → Detaching →
//! Disconnected`. The transport is owned by the session and released exactly
//! once on detach; color writes and the release are serialized through the
//! same lock, so detach waits for an in-flight write to finish.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::color::{ColorCommand, ColorParseError};
use crate::control::{ColorAttribute, ControlHost};
use crate::descriptor::{Capabilities, DescriptorError};
use crate::driver::KeyboardDriver;
use crate::errno;
use crate::report::{ReportError, REPORT_LEN};
use crate::transport::{Bus, DeviceInfo, Transport, TransportError};

/// Lifecycle state of a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Attaching,
    Active,
    Detaching,
}

/// Device is present but does not accept the color report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("unable to read report descriptor: {0}")]
    Descriptor(TransportError),

    #[error("failed to parse HID reports: {0}")]
    Parse(#[from] DescriptorError),

    #[error("no output report {0}")]
    MissingReport(u8),
}

/// Device could not be attached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    #[error("unable to open {path}: {source} (root permissions required)")]
    Open { path: String, source: TransportError },

    #[error("{path} is unusable: {source}")]
    Capability { path: String, source: CapabilityError },
}

/// Color request failure.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    MalformedInput(#[from] ColorParseError),

    #[error(transparent)]
    AllocationFailure(#[from] ReportError),

    #[error("device is not present")]
    NotPresent,

    #[error("failed to send color report: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Negative errno reported through the control attribute.
    pub fn errno(&self) -> i32 {
        match self {
            Self::MalformedInput(_) => -errno::EINVAL,
            Self::AllocationFailure(_) => -errno::ENOMEM,
            Self::NotPresent => -errno::ENODEV,
            Self::Transport(err) if err.status < 0 => err.status,
            Self::Transport(_) => -errno::EIO,
        }
    }
}

/// Read and scan the report descriptor of an opened device.
pub fn negotiate(
    transport: &mut dyn Transport,
    driver: &dyn KeyboardDriver,
) -> Result<Capabilities, CapabilityError> {
    let descriptor = transport.report_descriptor().map_err(CapabilityError::Descriptor)?;
    let caps = Capabilities::parse(&descriptor)?;

    let report_id = driver.report_id();
    match caps.output_len(report_id) {
        Some(len) if len + 1 != REPORT_LEN => {
            warn!("output report {report_id} is {} bytes, sending {REPORT_LEN} anyway", len + 1)
        },
        Some(_) => (),
        None => return Err(CapabilityError::MissingReport(report_id)),
    }

    Ok(caps)
}

/// One attached keyboard.
pub struct DeviceSession {
    device: DeviceInfo,
    driver: &'static dyn KeyboardDriver,
    state: Mutex<SessionState>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    control: Mutex<Option<Arc<dyn ControlHost>>>,
}

impl DeviceSession {
    /// Bind a driver to a present device.
    ///
    /// Failing to expose the control attribute is logged but does not fail the
    /// attach, the session is active without a control attribute then.
    pub fn attach(
        device: &DeviceInfo,
        driver: &'static dyn KeyboardDriver,
        bus: &dyn Bus,
        host: &Arc<dyn ControlHost>,
    ) -> Result<Arc<Self>, AttachError> {
        info!(device = %device.name, path = %device.path, "keyboard connected");

        let session = Arc::new(Self {
            device: device.clone(),
            driver,
            state: Mutex::new(SessionState::Attaching),
            transport: Mutex::new(None),
            control: Mutex::new(None),
        });

        let mut transport = bus.open(device).map_err(|source| {
            error!(device = %device.name, "failed to open device: {source}");
            AttachError::Open { path: device.path.clone(), source }
        })?;

        // Keyboards expose several interfaces, only one of them takes the
        // color report.
        let caps = negotiate(transport.as_mut(), driver).map_err(|source| {
            info!(device = %device.name, path = %device.path, "skipping interface: {source}");
            AttachError::Capability { path: device.path.clone(), source }
        })?;
        debug!(device = %device.name, ?caps, "negotiated capabilities");

        *session.transport.lock() = Some(transport);
        *session.state.lock() = SessionState::Active;

        session.register(host);

        Ok(session)
    }

    /// Expose the color attribute through `host`.
    fn register(self: &Arc<Self>, host: &Arc<dyn ControlHost>) {
        let attribute = ColorAttribute::new(Arc::downgrade(self));
        match host.register(&self.device.path, attribute) {
            Ok(()) => {
                *self.control.lock() = Some(host.clone());
                let name = ColorAttribute::NAME;
                info!(device = %self.device.name, "control attribute {name} created");
            },
            Err(err) => error!(device = %self.device.name, "can't create control attribute: {err}"),
        }
    }

    /// Parse an `R,G,B` payload and apply it.
    ///
    /// Malformed payloads are rejected before any device I/O.
    pub fn set_color(&self, payload: &str) -> Result<usize, SessionError> {
        let color = payload.parse::<ColorCommand>().map_err(|err| {
            warn!(device = %self.device.name, "{err}");
            err
        })?;

        self.apply(color)
    }

    /// Send a color to the device.
    ///
    /// Returns the number of bytes written. A failed write is not retried.
    pub fn apply(&self, color: ColorCommand) -> Result<usize, SessionError> {
        let ColorCommand { r, g, b } = color;
        info!(device = %self.device.name, "received color: R={r}, G={g}, B={b}");

        // Encoding and transmission happen under the transport lock, so
        // concurrent requests can't interleave and detach can't close the
        // device mid-write.
        let mut transport = self.transport.lock();
        let transport = transport.as_mut().ok_or(SessionError::NotPresent)?;

        let report = self.driver.color_report(color)?;
        debug!(device = %self.device.name, ?report, "sending color report");

        transport.send_output_report(report.id(), &report).map_err(|err| {
            error!(device = %self.device.name, "failed to send color report: {}", err.status);
            SessionError::from(err)
        })
    }

    /// Release the control attribute and the transport.
    ///
    /// The attribute is removed before the transport is closed. Detaching an
    /// already detached session does nothing.
    pub fn detach(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Disconnected {
                return;
            }
            *state = SessionState::Detaching;
        }

        if let Some(host) = self.control.lock().take() {
            host.deregister(&self.device.path);
        }

        // Blocks until an in-flight write has completed.
        let transport = self.transport.lock().take();
        let released = transport.is_some();
        drop(transport);

        *self.state.lock() = SessionState::Disconnected;

        if released {
            info!(device = %self.device.name, "keyboard disconnected");
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn name(&self) -> &str {
        &self.device.name
    }

    pub fn driver(&self) -> &'static dyn KeyboardDriver {
        self.driver
    }

    /// Check if the control attribute is currently exposed.
    pub fn is_controllable(&self) -> bool {
        self.control.lock().is_some()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.detach();
    }
}
