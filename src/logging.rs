//! Tracing setup and log rate limiting.
//!
//! Console output is human readable by default; `json` switches to one JSON
//! object per event for log shipping. `RUST_LOG` always wins over the
//! configured level.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    pub json: bool,
    /// Default to DEBUG instead of INFO
    pub verbose: bool,
}

fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={}",
            env!("CARGO_CRATE_NAME"),
            level.as_str().to_lowercase()
        ))
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: LogConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(default_filter(config.verbose));

    let installed = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

/// Sentinel meaning "nothing logged yet"
const NEVER: u64 = u64::MAX;

/// Lets at most one message through per interval.
///
/// Used for per-chunk progress logs and repeated display bus faults.
pub struct LogThrottle {
    interval_ms: u64,
    last_ms: AtomicU64,
    epoch: Instant,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            last_ms: AtomicU64::new(NEVER),
            epoch: Instant::now(),
        }
    }

    pub fn should_log(&self) -> bool {
        let now = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX - 1);
        let last = self.last_ms.load(Ordering::Relaxed);

        if last != NEVER && now.saturating_sub(last) < self.interval_ms {
            return false;
        }

        // Losing the race means another caller just logged.
        self.last_ms
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    pub fn reset(&self) {
        self.last_ms.store(NEVER, Ordering::Relaxed);
    }
}
