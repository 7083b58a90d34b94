//! HID report descriptor scanning.
//!
//! Only the items needed to find out which reports a device accepts are
//! interpreted: Report ID, Report Size, Report Count, Push and Pop, and the
//! Input, Output and Feature main items. Everything else is skipped.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use thiserror::Error;

/// Long item prefix.
const LONG_ITEM: u8 = 0xfe;

const TYPE_MAIN: u8 = 0;
const TYPE_GLOBAL: u8 = 1;

const MAIN_INPUT: u8 = 0x8;
const MAIN_OUTPUT: u8 = 0x9;
const MAIN_FEATURE: u8 = 0xb;

const GLOBAL_REPORT_SIZE: u8 = 0x7;
const GLOBAL_REPORT_ID: u8 = 0x8;
const GLOBAL_REPORT_COUNT: u8 = 0x9;
const GLOBAL_PUSH: u8 = 0xa;
const GLOBAL_POP: u8 = 0xb;

/// Descriptor that could not be scanned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor item at offset {0} is truncated")]
    Truncated(usize),

    #[error("unbalanced pop at offset {0}")]
    UnbalancedPop(usize),

    #[error("report length overflows at offset {0}")]
    Overflow(usize),
}

#[derive(Default, Copy, Clone)]
struct Globals {
    report_id: u8,
    report_size: u32,
    report_count: u32,
}

impl Globals {
    fn bits(&self) -> u64 {
        u64::from(self.report_size) * u64::from(self.report_count)
    }
}

/// Reports declared by a report descriptor.
///
/// Lengths are payload bytes, not counting the report ID. Devices without
/// report IDs use ID 0.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub input: BTreeMap<u8, usize>,
    pub output: BTreeMap<u8, usize>,
    pub feature: BTreeMap<u8, usize>,
}

impl Capabilities {
    /// Scan a raw report descriptor.
    pub fn parse(descriptor: &[u8]) -> Result<Self, DescriptorError> {
        let mut bits: [BTreeMap<u8, u64>; 3] = Default::default();

        let mut globals = Globals::default();
        let mut stack = Vec::new();

        let mut offset = 0;
        while let Some(&prefix) = descriptor.get(offset) {
            if prefix == LONG_ITEM {
                let size = *descriptor.get(offset + 1).ok_or(DescriptorError::Truncated(offset))?;
                let end = offset + 3 + usize::from(size);
                if end > descriptor.len() {
                    return Err(DescriptorError::Truncated(offset));
                }
                offset = end;
                continue;
            }

            let size = match prefix & 0x03 {
                3 => 4,
                size => usize::from(size),
            };
            let data = descriptor
                .get(offset + 1..offset + 1 + size)
                .ok_or(DescriptorError::Truncated(offset))?;
            let value = data.iter().rev().fold(0u32, |value, &byte| value << 8 | u32::from(byte));

            let tag = prefix >> 4;
            match ((prefix >> 2) & 0x03, tag) {
                (TYPE_MAIN, MAIN_INPUT) => accumulate(&mut bits[0], &globals, offset)?,
                (TYPE_MAIN, MAIN_OUTPUT) => accumulate(&mut bits[1], &globals, offset)?,
                (TYPE_MAIN, MAIN_FEATURE) => accumulate(&mut bits[2], &globals, offset)?,
                (TYPE_GLOBAL, GLOBAL_REPORT_ID) => globals.report_id = value as u8,
                (TYPE_GLOBAL, GLOBAL_REPORT_SIZE) => globals.report_size = value,
                (TYPE_GLOBAL, GLOBAL_REPORT_COUNT) => globals.report_count = value,
                (TYPE_GLOBAL, GLOBAL_PUSH) => stack.push(globals),
                (TYPE_GLOBAL, GLOBAL_POP) => {
                    globals = stack.pop().ok_or(DescriptorError::UnbalancedPop(offset))?
                },
                _ => (),
            }

            offset += 1 + size;
        }

        let [input, output, feature] = bits;
        Ok(Self {
            input: to_bytes(input, offset)?,
            output: to_bytes(output, offset)?,
            feature: to_bytes(feature, offset)?,
        })
    }

    /// Payload length of an output report, if the device declares it.
    pub fn output_len(&self, report_id: u8) -> Option<usize> {
        self.output.get(&report_id).copied()
    }
}

impl Display for Capabilities {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kinds = [("input", &self.input), ("output", &self.output), ("feature", &self.feature)];

        let mut first = true;
        for (kind, reports) in kinds {
            for (id, len) in reports {
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                write!(f, "{kind} {id} ({len} bytes)")?;
            }
        }

        if first {
            write!(f, "no reports")?;
        }

        Ok(())
    }
}

fn accumulate(
    reports: &mut BTreeMap<u8, u64>,
    globals: &Globals,
    offset: usize,
) -> Result<(), DescriptorError> {
    let total = reports.entry(globals.report_id).or_default();
    *total = total.checked_add(globals.bits()).ok_or(DescriptorError::Overflow(offset))?;
    Ok(())
}

/// Round report bit lengths up to whole bytes.
///
/// `end` is the descriptor length, used as the error offset.
fn to_bytes(
    reports: BTreeMap<u8, u64>,
    end: usize,
) -> Result<BTreeMap<u8, usize>, DescriptorError> {
    reports
        .into_iter()
        .map(|(id, bits)| match usize::try_from(bits.div_ceil(8)) {
            Ok(len) => Ok((id, len)),
            Err(_) => Err(DescriptorError::Overflow(end)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Vendor collection with a 63 byte output report 4 and an input report 5.
    #[rustfmt::skip]
    const VENDOR: &[u8] = &[
        0x06, 0x00, 0xff,  // Usage Page (Vendor Defined 0xFF00)
        0x09, 0x01,        // Usage (0x01)
        0xa1, 0x01,        // Collection (Application)
        0x85, 0x04,        //   Report ID (4)
        0x15, 0x00,        //   Logical Minimum (0)
        0x26, 0xff, 0x00,  //   Logical Maximum (255)
        0x75, 0x08,        //   Report Size (8)
        0x95, 0x3f,        //   Report Count (63)
        0x09, 0x02,        //   Usage (0x02)
        0x91, 0x02,        //   Output (Data,Var,Abs)
        0x85, 0x05,        //   Report ID (5)
        0x95, 0x3f,        //   Report Count (63)
        0x09, 0x03,        //   Usage (0x03)
        0x81, 0x02,        //   Input (Data,Var,Abs)
        0xc0,              // End Collection
    ];

    /// Boot keyboard without report IDs.
    #[rustfmt::skip]
    const BOOT_KEYBOARD: &[u8] = &[
        0x05, 0x01,        // Usage Page (Generic Desktop)
        0x09, 0x06,        // Usage (Keyboard)
        0xa1, 0x01,        // Collection (Application)
        0x05, 0x07,        //   Usage Page (Kbrd/Keypad)
        0x19, 0xe0,        //   Usage Minimum (0xE0)
        0x29, 0xe7,        //   Usage Maximum (0xE7)
        0x95, 0x08,        //   Report Count (8)
        0x75, 0x01,        //   Report Size (1)
        0x81, 0x02,        //   Input (Data,Var,Abs)
        0x95, 0x01,        //   Report Count (1)
        0x75, 0x08,        //   Report Size (8)
        0x81, 0x01,        //   Input (Const)
        0x05, 0x08,        //   Usage Page (LEDs)
        0x95, 0x05,        //   Report Count (5)
        0x75, 0x01,        //   Report Size (1)
        0x91, 0x02,        //   Output (Data,Var,Abs)
        0x95, 0x01,        //   Report Count (1)
        0x75, 0x03,        //   Report Size (3)
        0x91, 0x01,        //   Output (Const)
        0x95, 0x06,        //   Report Count (6)
        0x75, 0x08,        //   Report Size (8)
        0x81, 0x00,        //   Input (Data,Array,Abs)
        0xc0,              // End Collection
    ];

    #[test]
    fn vendor_output_report() {
        let caps = Capabilities::parse(VENDOR).unwrap();
        assert_eq!(caps.output_len(4), Some(63));
        assert_eq!(caps.input.get(&5), Some(&63));
        assert_eq!(caps.output_len(5), None);
        assert!(caps.feature.is_empty());
    }

    #[test]
    fn boot_keyboard_uses_id_zero() {
        let caps = Capabilities::parse(BOOT_KEYBOARD).unwrap();
        assert_eq!(caps.input.get(&0), Some(&8));
        assert_eq!(caps.output_len(0), Some(1));
        assert_eq!(caps.output_len(4), None);
    }

    #[test]
    fn push_pop_restores_globals() {
        #[rustfmt::skip]
        let descriptor = [
            0x85, 0x04,  // Report ID (4)
            0x75, 0x08,  // Report Size (8)
            0x95, 0x02,  // Report Count (2)
            0xa4,        // Push
            0x85, 0x07,  // Report ID (7)
            0x91, 0x02,  // Output
            0xb4,        // Pop
            0x91, 0x02,  // Output
        ];

        let caps = Capabilities::parse(&descriptor).unwrap();
        assert_eq!(caps.output_len(7), Some(2));
        assert_eq!(caps.output_len(4), Some(2));
    }

    #[test]
    fn long_items_are_skipped() {
        let descriptor =
            [0xfe, 0x02, 0x10, 0xaa, 0xbb, 0x85, 0x04, 0x75, 0x08, 0x95, 0x01, 0x91, 0x02];
        let caps = Capabilities::parse(&descriptor).unwrap();
        assert_eq!(caps.output_len(4), Some(1));
    }

    #[test]
    fn four_byte_items() {
        #[rustfmt::skip]
        let descriptor = [
            0x85, 0x04,                    // Report ID (4)
            0x77, 0x08, 0x00, 0x00, 0x00,  // Report Size (8)
            0x97, 0x02, 0x00, 0x00, 0x00,  // Report Count (2)
            0x91, 0x02,                    // Output
        ];
        let caps = Capabilities::parse(&descriptor).unwrap();
        assert_eq!(caps.output_len(4), Some(2));
    }

    #[test]
    fn truncated_item() {
        let err = Capabilities::parse(&[0x85, 0x04, 0x26, 0xff]);
        assert_eq!(err, Err(DescriptorError::Truncated(2)));
        assert_eq!(Capabilities::parse(&[0xfe, 0x05, 0x00]), Err(DescriptorError::Truncated(0)));
    }

    #[test]
    fn unbalanced_pop() {
        let err = Capabilities::parse(&[0x85, 0x04, 0xb4]);
        assert_eq!(err, Err(DescriptorError::UnbalancedPop(2)));
    }

    #[test]
    fn oversized_report_is_rejected() {
        #[rustfmt::skip]
        let descriptor = [
            0x85, 0x04,                    // Report ID (4)
            0x77, 0xff, 0xff, 0xff, 0xff,  // Report Size (0xffffffff)
            0x97, 0xff, 0xff, 0xff, 0xff,  // Report Count (0xffffffff)
            0x91, 0x02,                    // Output
            0x91, 0x02,                    // Output
        ];

        assert_eq!(Capabilities::parse(&descriptor), Err(DescriptorError::Overflow(14)));
    }

    #[test]
    fn display_lists_reports() {
        let caps = Capabilities::parse(VENDOR).unwrap();
        assert_eq!(caps.to_string(), "input 5 (63 bytes), output 4 (63 bytes)");
        assert_eq!(Capabilities::default().to_string(), "no reports");
    }

    #[test]
    fn empty_descriptor() {
        assert_eq!(Capabilities::parse(&[]), Ok(Capabilities::default()));
    }
}
