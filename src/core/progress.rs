//! Per-file progress reporting during a sync.
//!
//! The orchestrator only sees [`ProgressReporter`]. Whether progress goes to
//! the console alone or also to the 7-segment display is decided once at
//! startup.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::models::RemoteEntry;
use crate::display::{Bus, DisplayError, Tm1637};
use crate::logging::LogThrottle;

/// Largest value the two-digit halves of the display can show.
const MAX_PAIR: u8 = 99;

pub trait ProgressReporter: Send + Sync {
    /// Called once before the body of an entry is fetched. `index` is 1-based.
    fn file_started(&self, target: &Path, entry: &RemoteEntry, total: usize, index: usize);

    /// Called after every chunk with the running byte count for the entry.
    fn chunk_written(&self, entry: &RemoteEntry, bytes_read: u64);

    /// Called at the end of every sync cycle and on shutdown.
    fn reset(&self) {}
}

/// Entries left after the current one, clamped to what two digits can show.
///
/// `index` is 1-based; 0 is treated as the first entry.
pub fn remaining_count(total: usize, index: usize) -> u8 {
    let remaining = total.saturating_sub(index.max(1));
    remaining.min(usize::from(MAX_PAIR)) as u8
}

/// Percentage of the entry still to download, `100 - 100 * read / total`.
///
/// A zero-size entry counts as fully downloaded.
pub fn percent_remaining(bytes_read: u64, total_bytes: u64) -> u8 {
    if total_bytes == 0 {
        return 0;
    }
    let done = (u128::from(bytes_read) * 100 / u128::from(total_bytes)).min(100);
    (100 - done) as u8
}

fn digit_pair(value: u8) -> [u8; 2] {
    let value = value.min(MAX_PAIR);
    [value / 10, value % 10]
}

fn status_line(target: &Path, entry: &RemoteEntry, total: usize, index: usize) -> String {
    format!(
        "GET: {} size:{} progress:{}/{}",
        target.display(),
        entry.size,
        index,
        total
    )
}

/// Console-only reporting: one status line per file.
#[derive(Debug, Default)]
pub struct BasicReporter;

impl ProgressReporter for BasicReporter {
    fn file_started(&self, target: &Path, entry: &RemoteEntry, total: usize, index: usize) {
        println!("{}", status_line(target, entry, total, index));
    }

    fn chunk_written(&self, _entry: &RemoteEntry, _bytes_read: u64) {}
}

enum DisplayCommand {
    /// New file: draw the digits and light the colon
    Start([u8; 4]),
    Show([u8; 4]),
    Clear,
    Flush(mpsc::SyncSender<()>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic mid-frame leaves nothing that needs repair
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the bus for the lifetime of the reporter. Bit-banged frames and ack
/// timeouts block, so they never run on the async runtime.
fn drive<B: Bus>(display: &Mutex<Tm1637<B>>, commands: mpsc::Receiver<DisplayCommand>) {
    let faults = LogThrottle::new(Duration::from_secs(30));

    for command in commands {
        let result = {
            let mut display = lock(display);
            match command {
                DisplayCommand::Start(digits) => display
                    .show(digits)
                    .and_then(|()| display.show_colon()),
                DisplayCommand::Show(digits) => display.show(digits),
                DisplayCommand::Clear => display.clear(),
                DisplayCommand::Flush(done) => {
                    let _ = done.send(());
                    Ok(())
                }
            }
        };

        if let Err(e) = result {
            if faults.should_log() {
                warn!(error = %e, "Display update failed");
            }
        }
    }

    debug!("Display worker stopped");
}

/// Console reporting plus remaining files (left pair) and remaining percent
/// of the current file (right pair) on the 7-segment display.
///
/// Frames are drawn by a dedicated thread in the order they were reported.
/// Dropping the reporter waits for queued frames to be drawn.
pub struct DisplayReporter<B> {
    display: Arc<Mutex<Tm1637<B>>>,
    digits: Mutex<[u8; 4]>,
    commands: Option<mpsc::Sender<DisplayCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl<B: Bus + Send + 'static> DisplayReporter<B> {
    pub fn new(display: Tm1637<B>) -> io::Result<Self> {
        let display = Arc::new(Mutex::new(display));
        let (commands, queue) = mpsc::channel();

        let worker = {
            let display = display.clone();
            thread::Builder::new()
                .name("display".to_string())
                .spawn(move || drive(&display, queue))?
        };

        Ok(Self {
            display,
            digits: Mutex::new([0; 4]),
            commands: Some(commands),
            worker: Some(worker),
        })
    }

    /// Digits most recently handed to the display.
    pub fn digits(&self) -> [u8; 4] {
        *lock(&self.digits)
    }

    /// Wait for queued frames to be drawn, then run `f` against the driver,
    /// e.g. to inspect its bus.
    pub fn with_display<R>(&self, f: impl FnOnce(&mut Tm1637<B>) -> R) -> R {
        let (done, drawn) = mpsc::sync_channel(1);
        if self.send(DisplayCommand::Flush(done)) {
            let _ = drawn.recv();
        }
        f(&mut lock(&self.display))
    }

    fn send(&self, command: DisplayCommand) -> bool {
        let sent = self
            .commands
            .as_ref()
            .is_some_and(|commands| commands.send(command).is_ok());
        if !sent {
            debug!("Display worker is gone, dropping frame");
        }
        sent
    }
}

impl<B: Bus + Send + 'static> ProgressReporter for DisplayReporter<B> {
    fn file_started(&self, target: &Path, entry: &RemoteEntry, total: usize, index: usize) {
        println!("{}", status_line(target, entry, total, index));

        let [tens, ones] = digit_pair(remaining_count(total, index));
        let mut digits = lock(&self.digits);
        *digits = [tens, ones, 9, 9];
        self.send(DisplayCommand::Start(*digits));
    }

    fn chunk_written(&self, entry: &RemoteEntry, bytes_read: u64) {
        let [tens, ones] = digit_pair(percent_remaining(bytes_read, entry.size));
        let mut digits = lock(&self.digits);
        if digits[2..] == [tens, ones] {
            return;
        }
        digits[2] = tens;
        digits[3] = ones;
        self.send(DisplayCommand::Show(*digits));
    }

    fn reset(&self) {
        self.send(DisplayCommand::Clear);
    }
}

impl<B> Drop for DisplayReporter<B> {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the queue and exit
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Display worker panicked");
            }
        }
    }
}
