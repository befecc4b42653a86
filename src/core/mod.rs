pub mod cursor;
pub mod error;
pub mod link;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod share;
pub mod transfer;

pub use cursor::{CaptureKey, CursorMode, SyncCursor};
pub use error::{ErrorKind, SyncError};
pub use link::{LinkEvent, LinkEventMonitor, LinkSignal, MonitorExit};
pub use models::{RemoteEntry, SyncPhase};
pub use orchestrator::{CycleOutcome, CycleStats, SyncOrchestrator, SyncSettings};
pub use progress::{BasicReporter, DisplayReporter, ProgressReporter};
pub use share::{ChunkStream, FileShare, LeaseOutcome, LeaseProvider, ShareConnector};
