//! Device transport abstraction.

use std::fmt::{self, Display, Formatter};

use thiserror::Error;

/// Failed transport operation.
///
/// `status` is the raw negative status reported by the transport.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("transport status {status}")]
pub struct TransportError {
    pub status: i32,
}

impl TransportError {
    pub const fn new(status: i32) -> Self {
        Self { status }
    }
}

/// Snapshot of a device present on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: i32,
    pub path: String,
    pub name: String,
}

impl Display for DeviceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {} (interface {}, {})",
            self.vendor_id, self.product_id, self.name, self.interface, self.path
        )
    }
}

/// Byte channel to one opened device.
///
/// The device is closed when the transport is dropped.
pub trait Transport: Send {
    /// Send an output report, blocking until it was handed to the device.
    ///
    /// `data` starts with the report ID. Returns the number of bytes written.
    fn send_output_report(&mut self, report_id: u8, data: &[u8]) -> Result<usize, TransportError>;

    /// Raw HID report descriptor.
    fn report_descriptor(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Source of device presence and transports.
pub trait Bus {
    /// Devices currently present.
    fn devices(&mut self) -> Result<Vec<DeviceInfo>, TransportError>;

    /// Open a transport to a present device.
    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn Transport>, TransportError>;
}
