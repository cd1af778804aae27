//! Exclusive lock file guarding date-folder creation across runs.
//!
//! A run holds the lock only for one find-or-create step. A lock file older
//! than the acquire timeout is assumed to be left over from a run that
//! crashed, and is removed.

use super::StoreError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Held while the lock file exists; removing it on drop releases the lock.
#[derive(Debug)]
pub struct FolderLock {
    path: PathBuf,
}

impl FolderLock {
    /// Create `path` exclusively, retrying every `poll` until `timeout`.
    ///
    /// # Arguments
    ///
    /// * `path` - Lock file location
    /// * `poll` - Wait between attempts while another run holds the lock
    /// * `timeout` - Give up after this long; also the age at which an
    ///   existing lock file counts as stale
    ///
    /// # Returns
    ///
    /// A guard that deletes the lock file when dropped, or
    /// [`StoreError::Lock`] on timeout.
    pub async fn acquire(path: &Path, poll: Duration, timeout: Duration) -> Result<Self, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path).await {
                Ok(mut file) => {
                    let pid = format!("{}\n", std::process::id());
                    if let Err(e) = file.write_all(pid.as_bytes()).await {
                        debug!(error = %e, "Could not record pid in folder lock");
                    }
                    let _ = file.flush().await;
                    debug!(path = %path.display(), "Acquired folder lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(path, timeout).await {
                        warn!(path = %path.display(), "Removing stale folder lock");
                        match tokio::fs::remove_file(path).await {
                            Ok(()) => continue,
                            Err(e) if e.kind() == ErrorKind::NotFound => continue,
                            Err(e) => return Err(StoreError::Io(e)),
                        }
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(StoreError::Lock(path.display().to_string()));
                    }
                    debug!(path = %path.display(), "Folder lock held elsewhere; waiting");
                    sleep(poll).await;
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
    }
}

/// Whether the lock file at `path` was last written more than `max_age` ago.
async fn is_stale(path: &Path, max_age: Duration) -> bool {
    let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > max_age)
        .unwrap_or(false)
}

impl Drop for FolderLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove folder lock");
        }
    }
}
