use async_trait::async_trait;

use super::error::SyncError;
use super::models::RemoteEntry;

/// Outcome of the one-shot lease step. Logged, never acted upon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired,
    Failed(String),
}

/// Obtains a network address once the link is up.
#[async_trait]
pub trait LeaseProvider: Send + Sync {
    async fn acquire(&self) -> LeaseOutcome;
}

/// Opens a session against the camera's file share.
#[async_trait]
pub trait ShareConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FileShare>, SyncError>;
}

/// One session with the camera's file share.
#[async_trait]
pub trait FileShare: Send + Sync {
    /// List the files in a remote directory, in the order the camera reports them.
    async fn list_entries(&self, dir: &str) -> Result<Vec<RemoteEntry>, SyncError>;

    /// Start downloading an entry. The returned stream yields the file body in chunks.
    async fn download(&self, entry: &RemoteEntry) -> Result<Box<dyn ChunkStream>, SyncError>;
}

/// Lazily fetched file body.
#[async_trait]
pub trait ChunkStream: Send {
    /// Next chunk of the body, or `None` once the body is complete.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SyncError>;
}
