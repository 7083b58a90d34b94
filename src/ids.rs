//! USB vendor and product IDs.

/// Vendor ID of the keyboard controller.
pub const VENDOR_ID: u16 = 0x320f;

/// Product ID of the supported keyboard.
pub const PRODUCT_ID: u16 = 0x5055;

/// Vendor and product ID pair a driver binds to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceMatch {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceMatch {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self { vendor_id, product_id }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

/// Devices the keyboard driver binds to.
pub const KEYBOARDS: &[DeviceMatch] = &[DeviceMatch::new(VENDOR_ID, PRODUCT_ID)];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_matches() {
        assert!(KEYBOARDS.iter().any(|id| id.matches(0x320f, 0x5055)));
    }

    #[test]
    fn other_devices_do_not_match() {
        assert!(!KEYBOARDS.iter().any(|id| id.matches(0x320f, 0x5056)));
        assert!(!KEYBOARDS.iter().any(|id| id.matches(0x048d, 0x5055)));
    }
}
