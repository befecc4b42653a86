use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use camsync::core::{
    ChunkStream, CursorMode, CycleOutcome, DisplayReporter, FileShare, LeaseOutcome,
    LeaseProvider, LinkEventMonitor, LinkSignal, ProgressReporter, RemoteEntry, ShareConnector,
    SyncCursor, SyncError, SyncOrchestrator, SyncPhase, SyncSettings,
};
use camsync::display::{RecordingBus, Tm1637};
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const DIR: &str = "/DCIM/100OLYMP";

#[derive(Default)]
struct CountingLease {
    calls: AtomicUsize,
}

#[async_trait]
impl LeaseProvider for CountingLease {
    async fn acquire(&self) -> LeaseOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        LeaseOutcome::Failed("no dhcp in tests".to_string())
    }
}

/// Camera with a fixed set of files. Downloading `drop_link_on` reports a
/// disconnect through the monitor halfway through and then fails.
#[derive(Clone)]
struct FakeCamera {
    files: Arc<Vec<(RemoteEntry, Vec<u8>)>>,
    drop_link_on: Option<(String, Arc<LinkEventMonitor>)>,
    refuse_connections: bool,
    connects: Arc<AtomicUsize>,
}

impl FakeCamera {
    fn new(files: &[(&str, &str)]) -> Self {
        let files = files
            .iter()
            .map(|(name, body)| {
                (
                    RemoteEntry::new(DIR, *name, body.len() as u64),
                    body.as_bytes().to_vec(),
                )
            })
            .collect();

        Self {
            files: Arc::new(files),
            drop_link_on: None,
            refuse_connections: false,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ShareConnector for FakeCamera {
    async fn connect(&self) -> Result<Box<dyn FileShare>, SyncError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connections {
            return Err(SyncError::Connection("camera not answering".to_string()));
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl FileShare for FakeCamera {
    async fn list_entries(&self, dir: &str) -> Result<Vec<RemoteEntry>, SyncError> {
        assert_eq!(dir, DIR);
        Ok(self.files.iter().map(|(entry, _)| entry.clone()).collect())
    }

    async fn download(&self, entry: &RemoteEntry) -> Result<Box<dyn ChunkStream>, SyncError> {
        let (_, body) = self
            .files
            .iter()
            .find(|(e, _)| e.name == entry.name)
            .expect("download of unlisted entry");

        let monitor = match &self.drop_link_on {
            Some((name, monitor)) if *name == entry.name => Some(monitor.clone()),
            _ => None,
        };

        let chunks = body.chunks(4).map(<[u8]>::to_vec).collect();
        Ok(Box::new(FakeChunks {
            name: entry.name.clone(),
            chunks,
            sent: 0,
            monitor,
        }))
    }
}

struct FakeChunks {
    name: String,
    chunks: Vec<Vec<u8>>,
    sent: usize,
    monitor: Option<Arc<LinkEventMonitor>>,
}

#[async_trait]
impl ChunkStream for FakeChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SyncError> {
        if self.sent == 1 {
            if let Some(monitor) = &self.monitor {
                monitor.apply_line(b"wlan0 (phy #0): disconnected (by AP) reason: 3\n");
                return Err(SyncError::Download {
                    name: self.name.clone(),
                    reason: "connection reset".to_string(),
                });
            }
        }

        let chunk = self.chunks.get(self.sent).cloned();
        self.sent += 1;
        Ok(chunk)
    }
}

#[derive(Default)]
struct RecordingReporter {
    started: Mutex<Vec<(String, usize, usize)>>,
    resets: AtomicUsize,
}

impl ProgressReporter for RecordingReporter {
    fn file_started(&self, _target: &Path, entry: &RemoteEntry, total: usize, index: usize) {
        self.started
            .lock()
            .unwrap()
            .push((entry.name.clone(), index, total));
    }

    fn chunk_written(&self, _entry: &RemoteEntry, _bytes_read: u64) {}

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn settings(destination: &Path, cursor: SyncCursor) -> SyncSettings {
    SyncSettings {
        remote_dir: DIR.to_string(),
        destination: destination.to_path_buf(),
        cursor,
    }
}

#[tokio::test]
async fn test_cycle_copies_every_listed_file() {
    let dest = TempDir::new().unwrap();
    let link = LinkSignal::new();
    let lease = Arc::new(CountingLease::default());
    let camera = FakeCamera::new(&[
        ("PA290945.JPG", "first photo"),
        ("PA290946.ORF", "second photo, raw"),
    ]);
    let reporter = Arc::new(RecordingReporter::default());

    let orchestrator = SyncOrchestrator::new(
        link.clone(),
        lease.clone(),
        Arc::new(camera),
        reporter.clone(),
        settings(dest.path(), SyncCursor::All),
    );

    link.set(true);
    let outcome = orchestrator.run_cycle().await;

    let CycleOutcome::Completed(stats) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(stats.listed, 2);
    assert_eq!(stats.copied, 2);
    assert_eq!(stats.bytes, 28);

    assert_eq!(
        std::fs::read(dest.path().join("PA290945.JPG")).unwrap(),
        b"first photo"
    );
    assert_eq!(
        std::fs::read(dest.path().join("PA290946.ORF")).unwrap(),
        b"second photo, raw"
    );

    assert_eq!(
        *reporter.started.lock().unwrap(),
        vec![
            ("PA290945.JPG".to_string(), 1, 2),
            ("PA290946.ORF".to_string(), 2, 2),
        ]
    );
    // A failed lease is logged and the sync goes ahead anyway
    assert_eq!(lease.calls.load(Ordering::SeqCst), 1);
    assert_eq!(reporter.resets.load(Ordering::SeqCst), 1);
    assert!(!link.is_up());
    assert_eq!(orchestrator.phase(), SyncPhase::Waiting);
}

#[tokio::test]
async fn test_link_drop_abandons_cycle() {
    let dest = TempDir::new().unwrap();
    let link = LinkSignal::new();
    let monitor = Arc::new(LinkEventMonitor::new(link.clone()));

    let mut camera = FakeCamera::new(&[
        ("PA290945.JPG", "first photo"),
        ("PA290946.JPG", "interrupted photo"),
    ]);
    camera.drop_link_on = Some(("PA290946.JPG".to_string(), monitor.clone()));

    let orchestrator = SyncOrchestrator::new(
        link.clone(),
        Arc::new(CountingLease::default()),
        Arc::new(camera),
        Arc::new(RecordingReporter::default()),
        settings(dest.path(), SyncCursor::All),
    );

    monitor.apply_line(b"wlan0 (phy #0): connected to 02:00:00:00:00:01\n");
    assert!(link.is_up());

    let outcome = orchestrator.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Abandoned(SyncError::Download { ref name, .. }) if name == "PA290946.JPG"
    ));
    assert!(dest.path().join("PA290945.JPG").exists());
    assert!(!dest.path().join("PA290946.JPG").exists());
    assert!(!dest.path().join("PA290946.JPG.part").exists());
    assert!(!link.is_up());
    assert_eq!(orchestrator.phase(), SyncPhase::Waiting);
}

#[tokio::test]
async fn test_cursor_skips_already_synced_files() {
    let dest = TempDir::new().unwrap();
    let link = LinkSignal::new();
    let camera = FakeCamera::new(&[
        ("PA290945.JPG", "old"),
        ("PA290946.JPG", "cursor"),
        ("PA290947.JPG", "new"),
        ("PB010001.JPG", "newer"),
    ]);
    let reporter = Arc::new(RecordingReporter::default());
    let cursor = SyncCursor::parse(Some("PA290946.JPG"), CursorMode::Name).unwrap();

    let orchestrator = SyncOrchestrator::new(
        link.clone(),
        Arc::new(CountingLease::default()),
        Arc::new(camera),
        reporter.clone(),
        settings(dest.path(), cursor),
    );

    link.set(true);
    let CycleOutcome::Completed(stats) = orchestrator.run_cycle().await else {
        panic!("expected a completed cycle");
    };

    assert_eq!(stats.listed, 4);
    assert_eq!(stats.accepted, 2);
    assert!(!dest.path().join("PA290945.JPG").exists());
    assert!(!dest.path().join("PA290946.JPG").exists());
    assert!(dest.path().join("PA290947.JPG").exists());
    assert!(dest.path().join("PB010001.JPG").exists());

    let indexes: Vec<_> = reporter
        .started
        .lock()
        .unwrap()
        .iter()
        .map(|(_, index, total)| (*index, *total))
        .collect();
    assert_eq!(indexes, vec![(1, 2), (2, 2)]);
}

#[tokio::test]
async fn test_run_syncs_on_every_link_up() {
    let dest = TempDir::new().unwrap();
    let link = LinkSignal::new();
    let lease = Arc::new(CountingLease::default());
    let camera = FakeCamera::new(&[("PA290945.JPG", "photo")]);
    let connects = camera.connects.clone();

    let orchestrator = Arc::new(SyncOrchestrator::new(
        link.clone(),
        lease.clone(),
        Arc::new(camera),
        Arc::new(RecordingReporter::default()),
        settings(dest.path(), SyncCursor::All),
    ));

    let cancel = CancellationToken::new();
    let task = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.run(&cancel).await })
    };

    for cycle in 1..=2 {
        link.set(true);
        timeout(Duration::from_secs(2), async {
            while connects.load(Ordering::SeqCst) < cycle || link.is_up() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timeout waiting for sync cycle");
    }

    assert_eq!(lease.calls.load(Ordering::SeqCst), 2);
    assert!(dest.path().join("PA290945.JPG").exists());

    cancel.cancel();
    timeout(Duration::from_secs(1), task)
        .await
        .expect("run did not stop on cancel")
        .unwrap();
}

#[tokio::test]
async fn test_transient_failure_keeps_waiting() {
    let dest = TempDir::new().unwrap();
    let link = LinkSignal::new();
    let mut camera = FakeCamera::new(&[]);
    camera.refuse_connections = true;

    let orchestrator = SyncOrchestrator::new(
        link.clone(),
        Arc::new(CountingLease::default()),
        Arc::new(camera),
        Arc::new(RecordingReporter::default()),
        settings(dest.path(), SyncCursor::All),
    );

    link.set(true);
    let outcome = orchestrator.run_cycle().await;

    assert!(matches!(
        outcome,
        CycleOutcome::Abandoned(SyncError::Connection(_))
    ));
    assert!(!link.is_up());
}

#[tokio::test]
async fn test_unusable_destination_keeps_waiting() {
    let dest = TempDir::new().unwrap();
    let not_a_dir = dest.path().join("photos");
    std::fs::write(&not_a_dir, b"occupied").unwrap();

    let link = LinkSignal::new();
    let camera = FakeCamera::new(&[("PA290945.JPG", "photo")]);
    let connects = camera.connects.clone();
    let lease = Arc::new(CountingLease::default());
    let orchestrator = Arc::new(SyncOrchestrator::new(
        link.clone(),
        lease.clone(),
        Arc::new(camera),
        Arc::new(RecordingReporter::default()),
        settings(&not_a_dir, SyncCursor::All),
    ));

    link.set(true);
    let outcome = orchestrator.run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Abandoned(SyncError::Destination { .. })
    ));
    assert!(!link.is_up());
    assert_eq!(orchestrator.phase(), SyncPhase::Waiting);

    // The loop survives the storage failure and picks up the next link-up
    let cancel = CancellationToken::new();
    let task = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.run(&cancel).await })
    };

    link.set(true);
    timeout(Duration::from_secs(2), async {
        while lease.calls.load(Ordering::SeqCst) < 2 || link.is_up() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timeout waiting for second cycle");

    assert!(!task.is_finished());
    assert_eq!(connects.load(Ordering::SeqCst), 0);

    std::fs::remove_file(&not_a_dir).unwrap();
    link.set(true);
    timeout(Duration::from_secs(2), async {
        while !not_a_dir.join("PA290945.JPG").exists() || link.is_up() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timeout waiting for recovered sync");

    cancel.cancel();
    timeout(Duration::from_secs(1), task)
        .await
        .expect("run did not stop on cancel")
        .unwrap();
}

#[tokio::test]
async fn test_display_counts_down_and_blanks_after_cycle() {
    let dest = TempDir::new().unwrap();
    let link = LinkSignal::new();
    let camera = FakeCamera::new(&[
        ("PA290945.JPG", "12345678"),
        ("PA290946.JPG", "abcd"),
        ("PA290947.JPG", "wxyz"),
    ]);

    let display = Tm1637::new(RecordingBus::new(), 2).unwrap();
    let reporter = Arc::new(DisplayReporter::new(display).unwrap());

    let orchestrator = SyncOrchestrator::new(
        link.clone(),
        Arc::new(CountingLease::default()),
        Arc::new(camera),
        reporter.clone(),
        settings(dest.path(), SyncCursor::All),
    );

    link.set(true);
    orchestrator.run_cycle().await;

    let rendered: Vec<String> =
        reporter.with_display(|d| d.bus().frames().iter().map(|f| f.render()).collect());

    // First file: two remaining, counting down from 99 percent
    assert!(rendered.contains(&"02:99".to_string()));
    assert!(rendered.contains(&"02:50".to_string()));
    assert!(rendered.contains(&"00:00".to_string()));
    assert_eq!(rendered.last().map(String::as_str), Some("     "));
}
