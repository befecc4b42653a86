use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use filetime::FileTime;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{Instrument, debug, info_span, warn};

use super::error::SyncError;
use super::models::RemoteEntry;
use super::progress::ProgressReporter;
use super::share::FileShare;
use crate::logging::LogThrottle;

/// Download chunk size requested from the file share.
pub const CHUNK_SIZE: usize = 64 * 1024;

const PARTIAL_SUFFIX: &str = ".part";

/// Result of copying a single entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Make sure the destination exists and is a directory.
pub async fn prepare_destination(destination: &Path) -> Result<(), SyncError> {
    fs::create_dir_all(destination)
        .await
        .map_err(|source| SyncError::Destination {
            path: destination.to_path_buf(),
            source,
        })?;

    let metadata = fs::metadata(destination)
        .await
        .map_err(|source| SyncError::Destination {
            path: destination.to_path_buf(),
            source,
        })?;

    if !metadata.is_dir() {
        return Err(SyncError::Destination {
            path: destination.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
        });
    }

    Ok(())
}

/// Copy one remote entry into `destination`, reporting after every chunk.
///
/// The body is written to `<name>.part` and renamed into place once complete,
/// so an interrupted download never looks like a finished file.
pub async fn copy_entry(
    share: &dyn FileShare,
    entry: &RemoteEntry,
    destination: &Path,
    reporter: &dyn ProgressReporter,
    total: usize,
    index: usize,
) -> Result<CopiedFile, SyncError> {
    if !entry.has_plain_name() {
        return Err(SyncError::Protocol(format!(
            "refusing to copy '{}' outside {}",
            entry.name,
            destination.display()
        )));
    }

    let target = destination.join(&entry.name);
    let partial = destination.join(format!("{}{PARTIAL_SUFFIX}", entry.name));

    let span = info_span!("copy", entry = %entry.name, index, total);

    async {
        reporter.file_started(&target, entry, total, index);

        let mut body = share.download(entry).await?;
        let mut file = File::create(&partial).await.map_err(|source| SyncError::Write {
            path: partial.clone(),
            source,
        })?;

        let throttle = LogThrottle::new(Duration::from_secs(2));
        let started = Instant::now();
        let mut bytes_read: u64 = 0;

        let written = async {
            while let Some(chunk) = body.next_chunk().await? {
                file.write_all(&chunk)
                    .await
                    .map_err(|source| SyncError::Write {
                        path: partial.clone(),
                        source,
                    })?;
                bytes_read += chunk.len() as u64;
                reporter.chunk_written(entry, bytes_read);

                if throttle.should_log() {
                    debug!(bytes = bytes_read, size = entry.size, "Download progress");
                }
            }

            file.sync_all().await.map_err(|source| SyncError::Write {
                path: partial.clone(),
                source,
            })
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&partial).await {
                debug!(error = %cleanup, "Could not remove partial download");
            }
            return Err(e);
        }

        if bytes_read != entry.size {
            warn!(
                expected = entry.size,
                received = bytes_read,
                "Downloaded size differs from listing"
            );
        }

        fs::rename(&partial, &target)
            .await
            .map_err(|source| SyncError::Write {
                path: target.clone(),
                source,
            })?;

        if let Some(captured_at) = entry.captured_at {
            let mtime = FileTime::from_unix_time(captured_at.and_utc().timestamp(), 0);
            let path = target.clone();
            let stamped =
                tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime)).await;
            match stamped {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Could not set capture time on file"),
                Err(e) => debug!(error = %e, "Capture time task failed"),
            }
        }

        debug!(
            bytes = bytes_read,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Entry copied"
        );

        Ok(CopiedFile {
            path: target,
            bytes: bytes_read,
        })
    }
    .instrument(span)
    .await
}
