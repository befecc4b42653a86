//! Link state tracking driven by the wireless event stream.
//!
//! `iw event` prints one line per wireless event. Only two of them matter
//! here: association with the camera's access point and loss of it. The
//! monitor folds those lines into a single shared boolean that the sync loop
//! waits on.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CONNECTED_PATTERN: &[u8] = b": connected to";
const DISCONNECTED_PATTERN: &[u8] = b": disconnected ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Up,
    Down,
}

/// Recognize a link transition in one raw event line.
pub fn classify_line(line: &[u8]) -> Option<LinkEvent> {
    if contains(line, CONNECTED_PATTERN) {
        Some(LinkEvent::Up)
    } else if contains(line, DISCONNECTED_PATTERN) {
        Some(LinkEvent::Down)
    } else {
        None
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Shared "link is up" flag.
///
/// Backed by a watch channel so every task observes the latest value and
/// waiting never blocks the writer.
#[derive(Clone)]
pub struct LinkSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for LinkSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_up(&self) -> bool {
        *self.tx.borrow()
    }

    /// Set the flag. Returns true if the value changed.
    pub fn set(&self, up: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == up {
                false
            } else {
                *current = up;
                true
            }
        })
    }

    pub fn clear(&self) -> bool {
        self.set(false)
    }

    /// Resolve once the flag is true. Returns immediately if it already is.
    pub async fn wait_up(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives inside `self`, so the channel cannot close here.
        let _ = rx.wait_for(|up| *up).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Why the monitor stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The event source closed its output
    EndOfStream,
    Cancelled,
}

pub struct LinkEventMonitor {
    signal: LinkSignal,
}

impl LinkEventMonitor {
    pub fn new(signal: LinkSignal) -> Self {
        Self { signal }
    }

    /// Apply one event line to the signal.
    pub fn apply_line(&self, line: &[u8]) -> Option<LinkEvent> {
        let event = classify_line(line)?;
        let changed = self.signal.set(event == LinkEvent::Up);

        if changed {
            info!(event = ?event, "Link state changed");
        } else {
            debug!(event = ?event, "Link event did not change state");
        }

        Some(event)
    }

    /// Read events until the source closes or `cancel` fires.
    pub async fn run<R>(&self, reader: R, cancel: &CancellationToken) -> io::Result<MonitorExit>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut reader = reader;
        let mut line = Vec::new();

        loop {
            line.clear();

            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(MonitorExit::Cancelled),
                read = reader.read_until(b'\n', &mut line) => read?,
            };

            if read == 0 {
                debug!("Wireless event stream closed");
                return Ok(MonitorExit::EndOfStream);
            }

            self.apply_line(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_iw_event_lines() {
        assert_eq!(
            classify_line(b"wlan0 (phy #0): connected to 90:b6:86:12:34:56\n"),
            Some(LinkEvent::Up)
        );
        assert_eq!(
            classify_line(b"wlan0 (phy #0): disconnected (by AP) reason: 3: Deauthenticated\n"),
            Some(LinkEvent::Down)
        );
        assert_eq!(
            classify_line(b"wlan0 (phy #0): scan started\n"),
            None
        );
        assert_eq!(classify_line(b"wlan0: connected"), None);
        assert_eq!(classify_line(b""), None);
    }

    #[test]
    fn unrecognized_lines_leave_signal_unchanged() {
        let signal = LinkSignal::new();
        let monitor = LinkEventMonitor::new(signal.clone());

        monitor.apply_line(b"wlan0 (phy #0): connected to 90:b6:86:12:34:56");
        assert!(signal.is_up());

        monitor.apply_line(b"wlan0 (phy #0): scan aborted");
        monitor.apply_line(b"phy #0: regulatory domain change");
        assert!(signal.is_up());

        monitor.apply_line(b"wlan0 (phy #0): disconnected (local request)");
        assert!(!signal.is_up());

        monitor.apply_line(b"wlan0: new station 11:22:33:44:55:66");
        assert!(!signal.is_up());
    }

    #[test]
    fn set_reports_changes_only() {
        let signal = LinkSignal::new();
        assert!(signal.set(true));
        assert!(!signal.set(true));
        assert!(signal.clear());
        assert!(!signal.clear());
    }

    #[tokio::test]
    async fn wait_up_returns_immediately_when_up() {
        let signal = LinkSignal::new();
        signal.set(true);
        tokio::time::timeout(std::time::Duration::from_millis(100), signal.wait_up())
            .await
            .expect("wait_up should resolve");
    }
}
