//! 4-digit 7-segment progress display.

pub mod bus;
pub mod recording;
pub mod sysfs;
pub mod tm1637;

pub use bus::{Bus, Direction, DisplayError, Level};
pub use recording::{Frame, RecordingBus};
pub use sysfs::SysfsBus;
pub use tm1637::{BLANK, DisplayState, Tm1637};
