use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn from_bit(bit: bool) -> Self {
        if bit { Self::High } else { Self::Low }
    }

    pub fn is_high(self) -> bool {
        self == Self::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("gpio {pin}: {op} failed: {source}")]
    Gpio {
        pin: u32,
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("gpio {pin}: unexpected value {value:?}")]
    InvalidValue { pin: u32, value: String },
}

/// The two lines of the display's clocked serial interface.
///
/// Clock is always an output. Data switches to input for the acknowledgment
/// slot after each byte.
pub trait Bus {
    fn set_clk(&mut self, level: Level) -> Result<(), DisplayError>;

    /// Drive the data line. Only meaningful while it is an output.
    fn set_dio(&mut self, level: Level) -> Result<(), DisplayError>;

    fn set_dio_direction(&mut self, direction: Direction) -> Result<(), DisplayError>;

    fn read_dio(&mut self) -> Result<Level, DisplayError>;

    fn delay(&mut self, duration: Duration);
}
