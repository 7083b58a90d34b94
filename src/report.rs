//! 320f:5055 keyboard color output report.
//!
//! The layout was captured from the vendor software over USB and is only known
//! to hold for report ID 4 on this firmware. Offsets are not derived from any
//! documented protocol.
//!
//! # Output report layout (64 bytes)
//! | Offset | Field         | Value                 |
//! |--------|---------------|-----------------------|
//! | 0      | report ID     | 0x04                  |
//! | 1–4    | header        | 0x3b 0x02 0x06 0x22   |
//! | 9–11   | command class | 0x06 0x04 0x02        |
//! | 14–16  | color         | r, g, b               |
//! | 17     | mode          | 0x08                  |
//! | 28     | commit        | 0x01                  |
//!
//! Every other byte is zero.

use std::collections::TryReserveError;
use std::fmt::{self, Debug, Formatter};
use std::ops::Deref;

use bytes::{BufMut, Bytes};
use thiserror::Error;

use crate::color::ColorCommand;

/// Output report length in bytes, including the report ID.
pub const REPORT_LEN: usize = 64;

/// Report ID of the color command.
pub const REPORT_ID: u8 = 0x04;

/// Fixed offset of the red channel, green and blue follow.
pub const COLOR_OFFSET: usize = 14;

/// Constant bytes at a fixed offset.
#[derive(Debug, Copy, Clone)]
struct Field {
    offset: usize,
    bytes: &'static [u8],
}

impl Field {
    const fn new(offset: usize, bytes: &'static [u8]) -> Self {
        Self { offset, bytes }
    }

    const fn end(&self) -> usize {
        self.offset + self.bytes.len()
    }
}

const ID: Field = Field::new(0, &[REPORT_ID]);
const HEADER: Field = Field::new(1, &[0x3b, 0x02, 0x06, 0x22]);
const COMMAND_CLASS: Field = Field::new(9, &[0x06, 0x04, 0x02]);
const MODE: Field = Field::new(17, &[0x08]);
const COMMIT: Field = Field::new(28, &[0x01]);

/// Constant fields preceding the color.
const PREFIX: [Field; 3] = [ID, HEADER, COMMAND_CLASS];

/// Constant fields following the color.
const SUFFIX: [Field; 2] = [MODE, COMMIT];

/// Check that all fields are ascending, disjoint and inside the report.
const fn layout_is_valid() -> bool {
    let mut end = 0;

    let mut i = 0;
    while i < PREFIX.len() {
        if PREFIX[i].offset < end {
            return false;
        }
        end = PREFIX[i].end();
        i += 1;
    }

    if COLOR_OFFSET < end {
        return false;
    }
    end = COLOR_OFFSET + 3;

    let mut i = 0;
    while i < SUFFIX.len() {
        if SUFFIX[i].offset < end {
            return false;
        }
        end = SUFFIX[i].end();
        i += 1;
    }

    end <= REPORT_LEN
}

const _: () = assert!(layout_is_valid(), "overlapping or out of bounds report field");

/// Report encoding failure.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("unable to allocate color report: {0}")]
    Allocation(#[from] TryReserveError),
}

/// Sequential writer for fixed-offset report fields.
///
/// Gaps between fields are zero filled, fields must be written in ascending
/// order. Writing past `REPORT_LEN` is an internal bug and panics.
struct LayoutWriter<B> {
    buf: B,
    pos: usize,
}

impl<B: BufMut> LayoutWriter<B> {
    fn new(buf: B) -> Self {
        Self { buf, pos: 0 }
    }

    /// Zero pad up to `offset`.
    fn seek(&mut self, offset: usize) -> &mut Self {
        let in_order = offset >= self.pos && offset <= REPORT_LEN;
        assert!(in_order, "report field at {offset} out of order");
        self.buf.put_bytes(0, offset - self.pos);
        self.pos = offset;
        self
    }

    fn put_at(&mut self, offset: usize, bytes: &[u8]) -> &mut Self {
        self.seek(offset);
        assert!(self.pos + bytes.len() <= REPORT_LEN, "report field at {offset} too long");
        self.buf.put_slice(bytes);
        self.pos += bytes.len();
        self
    }

    fn put_field(&mut self, field: Field) -> &mut Self {
        self.put_at(field.offset, field.bytes)
    }

    /// Pad the remainder of the report and hand the buffer back.
    fn finish(mut self) -> B {
        self.seek(REPORT_LEN);
        self.buf
    }
}

/// Encoded color output report.
#[derive(Clone, PartialEq, Eq)]
pub struct Report(Bytes);

impl Report {
    /// Encode a color command.
    pub fn encode(command: ColorCommand) -> Self {
        Self::from_buffer(write_report(Vec::with_capacity(REPORT_LEN), command))
    }

    /// Encode a color command, reporting allocation failure instead of aborting.
    pub fn try_encode(command: ColorCommand) -> Result<Self, ReportError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(REPORT_LEN)?;
        Ok(Self::from_buffer(write_report(buf, command)))
    }

    fn from_buffer(buf: Vec<u8>) -> Self {
        assert_eq!(buf.len(), REPORT_LEN, "color report has wrong length");
        Self(Bytes::from(buf))
    }

    /// Report ID addressed by this report.
    pub fn id(&self) -> u8 {
        self.0[0]
    }
}

impl Deref for Report {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Report(")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

fn write_report<B: BufMut>(buf: B, command: ColorCommand) -> B {
    let mut writer = LayoutWriter::new(buf);

    for field in PREFIX {
        writer.put_field(field);
    }

    writer.put_at(COLOR_OFFSET, &[command.r, command.g, command.b]);

    for field in SUFFIX {
        writer.put_field(field);
    }

    writer.finish()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    /// Report bytes for black, as captured from the vendor software.
    const TEMPLATE: [u8; REPORT_LEN] = {
        let mut report = [0u8; REPORT_LEN];
        report[0] = 0x04;
        report[1] = 0x3b;
        report[2] = 0x02;
        report[3] = 0x06;
        report[4] = 0x22;
        report[9] = 0x06;
        report[10] = 0x04;
        report[11] = 0x02;
        report[17] = 0x08;
        report[28] = 0x01;
        report
    };

    #[test]
    fn matches_capture() {
        let report = Report::encode(ColorCommand::new(0xff, 0x80, 0x01));

        let mut expected = TEMPLATE;
        expected[14] = 0xff;
        expected[15] = 0x80;
        expected[16] = 0x01;

        assert_eq!(&report[..], &expected[..]);
    }

    #[test]
    fn black_is_template() {
        assert_eq!(&Report::encode(ColorCommand::default())[..], &TEMPLATE[..]);
    }

    #[test]
    fn report_id_leads() {
        let report = Report::encode(ColorCommand::new(1, 2, 3));
        assert_eq!(report.id(), REPORT_ID);
        assert_eq!(report.len(), REPORT_LEN);
    }

    #[test]
    fn try_encode_matches_encode() {
        let color = ColorCommand::new(9, 8, 7);
        assert_eq!(Report::try_encode(color).unwrap(), Report::encode(color));
    }

    #[test]
    fn reports_do_not_alias() {
        let red = Report::encode(ColorCommand::new(255, 0, 0));
        let blue = Report::encode(ColorCommand::new(0, 0, 255));

        assert_eq!(&red[COLOR_OFFSET..COLOR_OFFSET + 3], &[255, 0, 0]);
        assert_eq!(&blue[COLOR_OFFSET..COLOR_OFFSET + 3], &[0, 0, 255]);
    }

    #[test]
    fn debug_is_hex() {
        let debug = format!("{:?}", Report::encode(ColorCommand::default()));
        assert!(debug.starts_with("Report(04 3b 02 06 22 00"));
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn writer_rejects_backwards_fields() {
        let mut writer = LayoutWriter::new(Vec::new());
        writer.put_at(4, &[1]);
        writer.put_at(2, &[1]);
    }

    #[test]
    #[should_panic(expected = "too long")]
    fn writer_rejects_overflow() {
        let mut writer = LayoutWriter::new(Vec::new());
        writer.put_at(REPORT_LEN - 1, &[1, 2]);
    }

    proptest! {
        #[test]
        fn color_bytes_are_isolated(r in any::<u8>(), g in any::<u8>(), b in any::<u8>()) {
            let report = Report::encode(ColorCommand::new(r, g, b));

            prop_assert_eq!(report.len(), REPORT_LEN);
            for (offset, byte) in report.iter().enumerate() {
                let expected = match offset {
                    14 => r,
                    15 => g,
                    16 => b,
                    _ => TEMPLATE[offset],
                };
                prop_assert_eq!(*byte, expected, "offset {}", offset);
            }
        }

        #[test]
        fn encoding_is_deterministic(r in any::<u8>(), g in any::<u8>(), b in any::<u8>()) {
            let color = ColorCommand::new(r, g, b);
            prop_assert_eq!(Report::encode(color), Report::encode(color));
        }
    }
}
