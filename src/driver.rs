//! Keyboard driver descriptors.

use crate::color::ColorCommand;
use crate::ids::{self, DeviceMatch};
use crate::report::{self, Report, ReportError};
use crate::transport::DeviceInfo;

/// HID RGB keyboard driver.
pub trait KeyboardDriver: Send + Sync {
    /// Driver name used in logs.
    fn name(&self) -> &'static str;

    /// Devices this driver binds to.
    fn id_table(&self) -> &'static [DeviceMatch];

    /// Output report ID carrying color commands.
    fn report_id(&self) -> u8;

    /// Convert a color to the device-specific output report.
    fn color_report(&self, color: ColorCommand) -> Result<Report, ReportError>;

    /// Check if the driver binds to a device.
    fn matches(&self, device: &DeviceInfo) -> bool {
        self.id_table().iter().any(|id| id.matches(device.vendor_id, device.product_id))
    }
}

/// Single zone 320f:5055 keyboard.
pub struct RgbKeyboard;

impl KeyboardDriver for RgbKeyboard {
    fn name(&self) -> &'static str {
        "keyboard_rgb"
    }

    fn id_table(&self) -> &'static [DeviceMatch] {
        ids::KEYBOARDS
    }

    fn report_id(&self) -> u8 {
        report::REPORT_ID
    }

    fn color_report(&self, color: ColorCommand) -> Result<Report, ReportError> {
        Report::try_encode(color)
    }
}

/// Drivers available to the registry.
pub static DRIVERS: &[&dyn KeyboardDriver] = &[&RgbKeyboard];
