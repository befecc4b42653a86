use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Which side of the transfer a cycle failure came from. Either way the
/// window is abandoned and the loop waits for the next link-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Flaky link or camera hiccup
    Remote,
    /// Destination storage: full, read-only, unmounted
    Local,
}

/// Errors raised while provisioning or syncing one connection window.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not reach file share: {0}")]
    Connection(String),

    #[error("file share request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected file share response: {0}")]
    Protocol(String),

    #[error("download of {name} failed: {reason}")]
    Download { name: String, reason: String },

    #[error("destination {} is unusable: {source}", path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) | Self::Http(_) | Self::Protocol(_) | Self::Download { .. } => {
                ErrorKind::Remote
            }
            Self::Destination { .. } | Self::Write { .. } => ErrorKind::Local,
        }
    }

    pub fn is_local(&self) -> bool {
        self.kind() == ErrorKind::Local
    }
}
