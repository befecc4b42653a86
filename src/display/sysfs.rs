//! Bus backed by the Linux sysfs GPIO interface (`/sys/class/gpio`).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::bus::{Bus, Direction, DisplayError, Level};

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// After export, udev may need a moment to fix up permissions on the new nodes.
const EXPORT_SETTLE_ATTEMPTS: u32 = 20;
const EXPORT_SETTLE_INTERVAL: Duration = Duration::from_millis(10);

struct SysfsPin {
    number: u32,
    dir: PathBuf,
    value: File,
}

impl SysfsPin {
    fn open(root: &Path, number: u32) -> Result<Self, DisplayError> {
        let dir = root.join(format!("gpio{number}"));

        if !dir.exists() {
            let export = root.join("export");
            match fs::write(&export, number.to_string()) {
                Ok(()) => {}
                // Exported by someone else in the meantime
                Err(e) if e.raw_os_error() == Some(nix::libc::EBUSY) => {}
                Err(source) => {
                    return Err(DisplayError::Gpio {
                        pin: number,
                        op: "export",
                        source,
                    });
                }
            }
        }

        let value_path = dir.join("value");
        let mut attempt = 0;
        let value = loop {
            match OpenOptions::new().read(true).write(true).open(&value_path) {
                Ok(file) => break file,
                Err(e)
                    if attempt < EXPORT_SETTLE_ATTEMPTS
                        && matches!(
                            e.kind(),
                            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                        ) =>
                {
                    attempt += 1;
                    thread::sleep(EXPORT_SETTLE_INTERVAL);
                }
                Err(source) => {
                    return Err(DisplayError::Gpio {
                        pin: number,
                        op: "open value",
                        source,
                    });
                }
            }
        };

        debug!(pin = number, path = %dir.display(), "Opened gpio");
        Ok(Self { number, dir, value })
    }

    fn set_direction(&self, direction: &str) -> Result<(), DisplayError> {
        fs::write(self.dir.join("direction"), direction).map_err(|source| DisplayError::Gpio {
            pin: self.number,
            op: "set direction",
            source,
        })
    }

    fn write(&mut self, level: Level) -> Result<(), DisplayError> {
        let byte: &[u8] = if level.is_high() { b"1" } else { b"0" };
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.write_all(byte))
            .map_err(|source| DisplayError::Gpio {
                pin: self.number,
                op: "write value",
                source,
            })
    }

    fn read(&mut self) -> Result<Level, DisplayError> {
        let mut buf = [0u8; 1];
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.read_exact(&mut buf))
            .map_err(|source| DisplayError::Gpio {
                pin: self.number,
                op: "read value",
                source,
            })?;

        match buf[0] {
            b'0' => Ok(Level::Low),
            b'1' => Ok(Level::High),
            other => Err(DisplayError::InvalidValue {
                pin: self.number,
                value: String::from_utf8_lossy(&[other]).into_owned(),
            }),
        }
    }
}

/// Clock and data lines on two sysfs GPIO pins.
pub struct SysfsBus {
    clk: SysfsPin,
    dio: SysfsPin,
    /// Last level driven on the data line, restored when it returns to output.
    dio_level: Level,
}

impl SysfsBus {
    pub fn open(clk: u32, dio: u32) -> Result<Self, DisplayError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), clk, dio)
    }

    pub fn open_at(root: &Path, clk: u32, dio: u32) -> Result<Self, DisplayError> {
        let clk = SysfsPin::open(root, clk)?;
        let dio = SysfsPin::open(root, dio)?;
        clk.set_direction("low")?;
        dio.set_direction("low")?;

        Ok(Self {
            clk,
            dio,
            dio_level: Level::Low,
        })
    }
}

impl Bus for SysfsBus {
    fn set_clk(&mut self, level: Level) -> Result<(), DisplayError> {
        self.clk.write(level)
    }

    fn set_dio(&mut self, level: Level) -> Result<(), DisplayError> {
        self.dio_level = level;
        self.dio.write(level)
    }

    fn set_dio_direction(&mut self, direction: Direction) -> Result<(), DisplayError> {
        // "high"/"low" switch to output and set the level in one write,
        // avoiding a glitch on the data line.
        let value = match direction {
            Direction::Input => "in",
            Direction::Output if self.dio_level.is_high() => "high",
            Direction::Output => "low",
        };
        self.dio.set_direction(value)
    }

    fn read_dio(&mut self) -> Result<Level, DisplayError> {
        self.dio.read()
    }

    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}
