//! hidapi backed bus and transport.

use std::ffi::CString;

use hidapi::{HidApi, HidDevice, HidError};
use tracing::debug;

use crate::errno;
use crate::transport::{Bus, DeviceInfo, Transport, TransportError};

/// Maximum size of a HID report descriptor.
const MAX_DESCRIPTOR_SIZE: usize = 4096;

/// Map hidapi errors to a transport status.
///
/// hidapi does not expose the OS status, every failure is reported as `-EIO`.
fn status(err: HidError) -> TransportError {
    debug!("hidapi: {err}");
    TransportError::new(-errno::EIO)
}

/// HID devices of the host.
pub struct HidBus {
    api: HidApi,
}

impl HidBus {
    pub fn new() -> Result<Self, HidError> {
        Ok(Self { api: HidApi::new()? })
    }
}

impl Bus for HidBus {
    fn devices(&mut self) -> Result<Vec<DeviceInfo>, TransportError> {
        self.api.refresh_devices().map_err(status)?;

        let devices = self
            .api
            .device_list()
            .map(|info| DeviceInfo {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                interface: info.interface_number(),
                path: info.path().to_string_lossy().into_owned(),
                name: info.product_string().unwrap_or("unknown device").to_owned(),
            })
            .collect();

        Ok(devices)
    }

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn Transport>, TransportError> {
        let path =
            CString::new(device.path.as_str()).map_err(|_| TransportError::new(-errno::EINVAL))?;
        let device = self.api.open_path(&path).map_err(status)?;
        Ok(Box::new(HidTransport { device }))
    }
}

/// Opened hidraw device, closed on drop.
pub struct HidTransport {
    device: HidDevice,
}

impl Transport for HidTransport {
    fn send_output_report(&mut self, report_id: u8, data: &[u8]) -> Result<usize, TransportError> {
        // hidapi takes the report ID as the first byte of the buffer.
        debug_assert_eq!(data.first(), Some(&report_id));
        self.device.write(data).map_err(status)
    }

    fn report_descriptor(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0; MAX_DESCRIPTOR_SIZE];
        let len = self.device.get_report_descriptor(&mut buf).map_err(status)?;
        buf.truncate(len);
        Ok(buf)
    }
}
