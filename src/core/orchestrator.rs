use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cursor::SyncCursor;
use super::error::{ErrorKind, SyncError};
use super::link::LinkSignal;
use super::models::SyncPhase;
use super::progress::ProgressReporter;
use super::share::{LeaseOutcome, LeaseProvider, ShareConnector};
use super::transfer;

/// What to sync and where to.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Directory listed on the camera, e.g. `/DCIM/100OLYMP`
    pub remote_dir: String,
    pub destination: PathBuf,
    pub cursor: SyncCursor,
}

/// Counters for one completed connection window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub listed: usize,
    pub accepted: usize,
    pub copied: usize,
    pub bytes: u64,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleStats),
    /// A failure ended the window early; retried on the next link-up
    Abandoned(SyncError),
}

/// Runs one sync per link-up edge.
///
/// Waiting -> Provisioning (lease) -> Syncing (list, filter, copy) -> Waiting.
pub struct SyncOrchestrator {
    link: LinkSignal,
    lease: Arc<dyn LeaseProvider>,
    connector: Arc<dyn ShareConnector>,
    reporter: Arc<dyn ProgressReporter>,
    settings: SyncSettings,
    phase: watch::Sender<SyncPhase>,
}

impl SyncOrchestrator {
    pub fn new(
        link: LinkSignal,
        lease: Arc<dyn LeaseProvider>,
        connector: Arc<dyn ShareConnector>,
        reporter: Arc<dyn ProgressReporter>,
        settings: SyncSettings,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Waiting);
        Self {
            link,
            lease,
            connector,
            reporter,
            settings,
            phase,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_if_modified(|current| {
            let changed = *current != phase;
            *current = phase;
            changed
        });
        debug!(phase = phase.as_str(), "Sync phase");
    }

    /// Loop until cancelled. Failed cycles are logged and never end the loop.
    pub async fn run(&self, cancel: &CancellationToken) {
        info!(
            remote_dir = %self.settings.remote_dir,
            destination = %self.settings.destination.display(),
            "Waiting for camera link"
        );

        loop {
            self.set_phase(SyncPhase::Waiting);

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.link.wait_up() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.finish_cycle();
                    return;
                }
                _ = self.run_cycle() => {}
            }
        }
    }

    /// Provision and sync once, then clear the link and return to Waiting.
    ///
    /// Camera-side failures are logged at `warn`, storage failures at `error`.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let result = self.sync_window().await;
        self.finish_cycle();

        match result {
            Ok(stats) => {
                info!(
                    listed = stats.listed,
                    accepted = stats.accepted,
                    copied = stats.copied,
                    bytes = stats.bytes,
                    "Sync complete"
                );
                CycleOutcome::Completed(stats)
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::Remote => {
                        warn!(error = %e, "Sync attempt abandoned, waiting for next link-up")
                    }
                    ErrorKind::Local => {
                        error!(error = %e, "Sync failed on local storage, waiting for next link-up")
                    }
                }
                CycleOutcome::Abandoned(e)
            }
        }
    }

    fn finish_cycle(&self) {
        self.link.clear();
        self.reporter.reset();
        self.set_phase(SyncPhase::Waiting);
    }

    async fn sync_window(&self) -> Result<CycleStats, SyncError> {
        self.set_phase(SyncPhase::Provisioning);
        info!("Camera link up, acquiring lease");

        // The lease outcome is deliberately not acted on: a failed lease
        // still gets one attempt at the file share.
        match self.lease.acquire().await {
            LeaseOutcome::Acquired => debug!("Lease acquired"),
            LeaseOutcome::Failed(reason) => {
                warn!(reason = %reason, "Lease acquisition failed, trying file share anyway")
            }
        }

        self.set_phase(SyncPhase::Syncing);
        transfer::prepare_destination(&self.settings.destination).await?;

        let share = self.connector.connect().await?;
        let listing = share.list_entries(&self.settings.remote_dir).await?;
        let listed = listing.len();
        let entries = self.settings.cursor.filter(listing);
        let total = entries.len();

        info!(listed, accepted = total, "Listed camera files");

        let mut stats = CycleStats {
            listed,
            accepted: total,
            ..CycleStats::default()
        };

        for (i, entry) in entries.iter().enumerate() {
            let copied = transfer::copy_entry(
                share.as_ref(),
                entry,
                &self.settings.destination,
                self.reporter.as_ref(),
                total,
                i + 1,
            )
            .await?;

            stats.copied += 1;
            stats.bytes += copied.bytes;
        }

        Ok(stats)
    }
}
