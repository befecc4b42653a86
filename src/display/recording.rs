//! In-memory bus that decodes what the driver puts on the wire.
//!
//! Used by the tests and by simulation mode, where decoded frames are logged
//! instead of lighting up real segments.

use std::time::Duration;

use tracing::debug;

use super::bus::{Bus, Direction, DisplayError, Level};
use super::tm1637::{CMD_ADDRESS_START, CMD_DISPLAY_ON, decode_segments};

/// Every call the driver made, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Clk(Level),
    Dio(Level),
    Direction(Direction),
    Read(Level),
    Delay(Duration),
}

/// One decoded display update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub digits: [Option<u8>; 4],
    pub colon: bool,
    pub brightness: u8,
}

impl Frame {
    /// Decode three consecutive bursts: data command, address + digits, control.
    pub fn from_bursts(bursts: &[Vec<u8>]) -> Option<Self> {
        let [_command, digits, control] = bursts else {
            return None;
        };
        let (&address, segments) = digits.split_first()?;
        if address != CMD_ADDRESS_START || segments.len() != 4 {
            return None;
        }
        let &[control] = control.as_slice() else {
            return None;
        };
        if control & 0xF8 != CMD_DISPLAY_ON {
            return None;
        }

        let mut decoded = [None; 4];
        for (slot, segments) in decoded.iter_mut().zip(segments) {
            *slot = decode_segments(*segments);
        }

        Some(Self {
            digits: decoded,
            colon: segments.iter().any(|s| s & 0x80 != 0),
            brightness: control & 0x07,
        })
    }

    /// Human readable rendering, e.g. `03:75`.
    pub fn render(&self) -> String {
        let digit = |d: Option<u8>| match d {
            Some(v) if v < 16 => char::from_digit(u32::from(v), 16).unwrap_or('?'),
            Some(_) => ' ',
            None => '?',
        };
        format!(
            "{}{}{}{}{}",
            digit(self.digits[0]),
            digit(self.digits[1]),
            if self.colon { ':' } else { ' ' },
            digit(self.digits[2]),
            digit(self.digits[3]),
        )
    }
}

pub struct RecordingBus {
    ops: Vec<BusOp>,
    clk: Level,
    dio: Level,
    direction: Direction,
    acknowledge: bool,
    in_burst: bool,
    bits: Vec<bool>,
    bursts: Vec<Vec<u8>>,
    reads: usize,
    log_frames: bool,
}

impl Default for RecordingBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBus {
    /// A bus whose device acknowledges every byte.
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            clk: Level::Low,
            dio: Level::Low,
            direction: Direction::Output,
            acknowledge: true,
            in_burst: false,
            bits: Vec::new(),
            bursts: Vec::new(),
            reads: 0,
            log_frames: false,
        }
    }

    /// A bus with nothing attached: the data line floats high.
    pub fn unresponsive() -> Self {
        Self {
            acknowledge: false,
            ..Self::new()
        }
    }

    /// Log every completed frame at debug level.
    pub fn logging(mut self) -> Self {
        self.log_frames = true;
        self
    }

    pub fn ops(&self) -> &[BusOp] {
        &self.ops
    }

    /// Bytes of every completed burst, acknowledgment slots stripped.
    pub fn bursts(&self) -> Vec<Vec<u8>> {
        self.bursts.clone()
    }

    pub fn take_bursts(&mut self) -> Vec<Vec<u8>> {
        self.ops.clear();
        std::mem::take(&mut self.bursts)
    }

    /// Complete frames decoded from the recorded bursts.
    pub fn frames(&self) -> Vec<Frame> {
        self.bursts
            .chunks_exact(3)
            .filter_map(Frame::from_bursts)
            .collect()
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.frames().pop()
    }

    /// Number of acknowledgment samples taken.
    pub fn reads(&self) -> usize {
        self.reads
    }

    fn finish_burst(&mut self) {
        let bytes: Vec<u8> = self
            .bits
            .chunks_exact(9)
            .map(|slot| {
                slot[..8]
                    .iter()
                    .enumerate()
                    .fold(0u8, |byte, (i, bit)| byte | (u8::from(*bit) << i))
            })
            .collect();
        self.bits.clear();
        self.in_burst = false;
        self.bursts.push(bytes);

        if self.log_frames && self.bursts.len() % 3 == 0 {
            if let Some(frame) = self.bursts.chunks_exact(3).last().and_then(Frame::from_bursts) {
                debug!(display = %frame.render(), brightness = frame.brightness, "Display frame");
            }
        }
    }
}

impl Bus for RecordingBus {
    fn set_clk(&mut self, level: Level) -> Result<(), DisplayError> {
        self.ops.push(BusOp::Clk(level));
        let rising = self.clk == Level::Low && level == Level::High;
        self.clk = level;

        if rising && self.in_burst {
            self.bits.push(self.dio.is_high());
        }
        Ok(())
    }

    fn set_dio(&mut self, level: Level) -> Result<(), DisplayError> {
        self.ops.push(BusOp::Dio(level));
        let previous = self.dio;
        self.dio = level;

        if self.direction != Direction::Output || self.clk != Level::High || previous == level {
            return Ok(());
        }

        match level {
            // Data falling while clock is high: start condition
            Level::Low => {
                self.in_burst = true;
                self.bits.clear();
            }
            // Data rising while clock is high: stop condition
            Level::High if self.in_burst => self.finish_burst(),
            Level::High => {}
        }
        Ok(())
    }

    fn set_dio_direction(&mut self, direction: Direction) -> Result<(), DisplayError> {
        self.ops.push(BusOp::Direction(direction));
        self.direction = direction;
        Ok(())
    }

    fn read_dio(&mut self) -> Result<Level, DisplayError> {
        let level = if self.acknowledge {
            Level::Low
        } else {
            Level::High
        };
        self.reads += 1;
        self.ops.push(BusOp::Read(level));
        Ok(level)
    }

    fn delay(&mut self, duration: Duration) {
        self.ops.push(BusOp::Delay(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_render_shows_colon_and_blanks() {
        let frame = Frame {
            digits: [Some(0), Some(3), Some(7), Some(0x7F)],
            colon: true,
            brightness: 2,
        };
        assert_eq!(frame.render(), "03:7 ");
    }

    #[test]
    fn rejects_malformed_bursts() {
        assert!(Frame::from_bursts(&[vec![0x40], vec![0xC0, 0x3f], vec![0x8a]]).is_none());
        assert!(Frame::from_bursts(&[vec![0x40]]).is_none());
    }
}
