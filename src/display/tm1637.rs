//! Driver for TM1637-style 4-digit 7-segment displays.
//!
//! The chip speaks a two-wire protocol that resembles I2C without addressing:
//! bytes go out least significant bit first and each one is followed by an
//! acknowledgment slot. A frame updates every digit plus brightness and colon.

use std::time::Duration;

use tracing::debug;

use super::bus::{Bus, Direction, DisplayError, Level};

/// Data command: write display registers with auto-incrementing address.
pub const CMD_AUTO_INCREMENT: u8 = 0x40;
/// Address command: start at the first digit register.
pub const CMD_ADDRESS_START: u8 = 0xC0;
/// Display control: display on, brightness in the low three bits.
pub const CMD_DISPLAY_ON: u8 = 0x88;

pub const BRIGHTNESS_DARKEST: u8 = 0;
pub const BRIGHTNESS_TYPICAL: u8 = 2;
pub const BRIGHTNESS_HIGHEST: u8 = 7;

/// Digit value rendered with all segments off.
pub const BLANK: u8 = 0x7F;

/// Colon segment. Wired to the decimal point of the second digit, so it has
/// to be set on every digit byte to light up reliably.
pub const COLON_BIT: u8 = 0x80;

/// How many times the acknowledgment slot is sampled before recovering the bus.
pub const ACK_POLL_ATTEMPTS: u32 = 5;
pub const ACK_POLL_INTERVAL: Duration = Duration::from_millis(1);

const HEX_SEGMENTS: [u8; 16] = [
    0x3f, 0x06, 0x5b, 0x4f, 0x66, 0x6d, 0x7d, 0x07, 0x7f, 0x6f, 0x77, 0x7c, 0x39, 0x5e, 0x79, 0x71,
];

/// Segment pattern for one digit value.
pub fn encode_digit(value: u8, colon: bool) -> u8 {
    match HEX_SEGMENTS.get(usize::from(value)) {
        Some(segments) if colon => segments | COLON_BIT,
        Some(segments) => *segments,
        None => 0,
    }
}

/// Inverse of [`encode_digit`], ignoring the colon bit.
pub fn decode_segments(segments: u8) -> Option<u8> {
    let segments = segments & !COLON_BIT;
    if segments == 0 {
        return Some(BLANK);
    }
    HEX_SEGMENTS
        .iter()
        .position(|s| *s == segments)
        .map(|i| i as u8)
}

/// What the display currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayState {
    pub digits: [u8; 4],
    pub colon: bool,
    pub brightness: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    Received,
    Recovered,
}

pub struct Tm1637<B> {
    bus: B,
    state: DisplayState,
    missed_acks: u64,
}

impl<B: Bus> Tm1637<B> {
    pub fn new(mut bus: B, brightness: u8) -> Result<Self, DisplayError> {
        bus.set_dio_direction(Direction::Output)?;
        bus.set_clk(Level::Low)?;
        bus.set_dio(Level::Low)?;

        Ok(Self {
            bus,
            state: DisplayState {
                digits: [0; 4],
                colon: false,
                brightness: brightness.min(BRIGHTNESS_HIGHEST),
            },
            missed_acks: 0,
        })
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    /// Bytes the chip failed to acknowledge since creation.
    pub fn missed_acks(&self) -> u64 {
        self.missed_acks
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn show(&mut self, digits: [u8; 4]) -> Result<(), DisplayError> {
        self.transmit(DisplayState { digits, ..self.state })
    }

    /// Show a decimal number, right aligned and zero padded. Clamped to 9999.
    pub fn show_number(&mut self, value: u16) -> Result<(), DisplayError> {
        let value = value.min(9999);
        let digits = [
            (value / 1000 % 10) as u8,
            (value / 100 % 10) as u8,
            (value / 10 % 10) as u8,
            (value % 10) as u8,
        ];
        self.show(digits)
    }

    pub fn show_colon(&mut self) -> Result<(), DisplayError> {
        self.transmit(DisplayState {
            colon: true,
            ..self.state
        })
    }

    pub fn hide_colon(&mut self) -> Result<(), DisplayError> {
        self.transmit(DisplayState {
            colon: false,
            ..self.state
        })
    }

    /// Re-renders the current digits if the level changes.
    pub fn set_brightness(&mut self, brightness: u8) -> Result<(), DisplayError> {
        let brightness = brightness.min(BRIGHTNESS_HIGHEST);
        if brightness == self.state.brightness {
            return Ok(());
        }
        self.transmit(DisplayState {
            brightness,
            ..self.state
        })
    }

    /// Blank the display at minimum brightness.
    ///
    /// Brightness and colon settings survive for the next render, but nothing
    /// is re-rendered here.
    pub fn clear(&mut self) -> Result<(), DisplayError> {
        let DisplayState {
            colon, brightness, ..
        } = self.state;

        let result = self.transmit(DisplayState {
            digits: [BLANK; 4],
            colon: false,
            brightness: BRIGHTNESS_DARKEST,
        });

        self.state.colon = colon;
        self.state.brightness = brightness;
        result
    }

    fn transmit(&mut self, next: DisplayState) -> Result<(), DisplayError> {
        self.start()?;
        self.write_byte(CMD_AUTO_INCREMENT)?;
        self.stop()?;

        self.start()?;
        self.write_byte(CMD_ADDRESS_START)?;
        for digit in next.digits {
            self.write_byte(encode_digit(digit, next.colon))?;
        }
        self.stop()?;

        self.start()?;
        self.write_byte(CMD_DISPLAY_ON | next.brightness)?;
        self.stop()?;

        self.state = next;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DisplayError> {
        self.bus.set_clk(Level::High)?;
        self.bus.set_dio(Level::High)?;
        self.bus.set_dio(Level::Low)?;
        self.bus.set_clk(Level::Low)
    }

    fn stop(&mut self) -> Result<(), DisplayError> {
        self.bus.set_clk(Level::Low)?;
        self.bus.set_dio(Level::Low)?;
        self.bus.set_clk(Level::High)?;
        self.bus.set_dio(Level::High)
    }

    fn write_byte(&mut self, byte: u8) -> Result<Ack, DisplayError> {
        let mut data = byte;
        for _ in 0..8 {
            self.bus.set_clk(Level::Low)?;
            self.bus.set_dio(Level::from_bit(data & 0x01 != 0))?;
            data >>= 1;
            self.bus.set_clk(Level::High)?;
        }

        // Ninth clock: release the data line and let the chip pull it low.
        self.bus.set_clk(Level::Low)?;
        self.bus.set_dio(Level::High)?;
        self.bus.set_clk(Level::High)?;
        self.bus.set_dio_direction(Direction::Input)?;

        let mut ack = Ack::Recovered;
        for attempt in 0..ACK_POLL_ATTEMPTS {
            if !self.bus.read_dio()?.is_high() {
                ack = Ack::Received;
                break;
            }
            if attempt + 1 < ACK_POLL_ATTEMPTS {
                self.bus.delay(ACK_POLL_INTERVAL);
            }
        }

        self.bus.set_clk(Level::Low)?;
        self.bus.set_dio_direction(Direction::Output)?;

        if ack == Ack::Recovered {
            // No acknowledgment: pull the line low ourselves so the next
            // start condition sees a sane bus.
            self.bus.set_dio(Level::Low)?;
            self.missed_acks += 1;
            debug!(byte = format!("{byte:#04x}"), "Display did not acknowledge byte");
        }

        Ok(ack)
    }
}
