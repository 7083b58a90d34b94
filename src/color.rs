//! Color requests.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

/// Payload could not be turned into a color.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid color {input:?}: expected R,G,B with each channel in 0..=255")]
pub struct ColorParseError {
    input: String,
}

impl ColorParseError {
    fn new(input: &str) -> Self {
        Self { input: input.to_owned() }
    }
}

/// RGB color command.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct ColorCommand {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ColorCommand {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for ColorCommand {
    type Err = ColorParseError;

    /// Parse the `R,G,B` control payload.
    ///
    /// Whitespace around the payload and around each channel is ignored, so
    /// `echo 10,20,30 > rgb_color` style input with its trailing newline works.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut channels = s.trim().split(',').map(|channel| u8::from_str(channel.trim()));

        match (channels.next(), channels.next(), channels.next(), channels.next()) {
            (Some(Ok(r)), Some(Ok(g)), Some(Ok(b)), None) => Ok(Self::new(r, g, b)),
            _ => Err(ColorParseError::new(s)),
        }
    }
}

impl Display for ColorCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_triple() {
        assert_eq!("10,20,30".parse(), Ok(ColorCommand::new(10, 20, 30)));
        assert_eq!("0,0,0".parse(), Ok(ColorCommand::new(0, 0, 0)));
        assert_eq!("255,255,255".parse(), Ok(ColorCommand::new(255, 255, 255)));
    }

    #[test]
    fn tolerates_whitespace() {
        assert_eq!("10,20,30\n".parse(), Ok(ColorCommand::new(10, 20, 30)));
        assert_eq!(" 1, 2 ,3 ".parse(), Ok(ColorCommand::new(1, 2, 3)));
    }

    #[test]
    fn rejects_malformed() {
        for input in ["10,20", "a,b,c", "", "256,0,0", "1,2,3,4", "-1,0,0", "1,,3", "1;2;3"] {
            assert!(input.parse::<ColorCommand>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn display_round_trips() {
        let color = ColorCommand::new(7, 128, 255);
        assert_eq!(color.to_string(), "7,128,255");
        assert_eq!(color.to_string().parse(), Ok(color));
    }
}
