//! Advisory file locks, shared between processes on the same host.
//!
//! Locking a directory takes an exclusive OS lock on a `.lock` file inside
//! it. Acquisition polls: a lock held by someone else, an interrupted call or
//! an unexpected I/O error all lead to another attempt after the retry
//! interval, forever.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fs3::FileExt;
use parking_lot::Mutex;
use testbed_locks::{LockGuard, LockManager, LockStatus};
use tracing::{debug, warn};

/// Name of the lock file created inside locked directories.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Default delay between two acquisition attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Options for configuring a `FileLockManager`.
#[derive(Clone, Debug)]
pub struct FileLockManagerOptions {
    /// Delay between two acquisition attempts.
    pub retry_interval: Duration,
}

impl Default for FileLockManagerOptions {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Lock manager backed by OS file locks.
///
/// Locks are not re-entrant: locking a path this manager already holds waits
/// until the existing guard is released.
#[derive(Clone, Debug)]
pub struct FileLockManager {
    held: Arc<Mutex<HashSet<PathBuf>>>,
    retry_interval: Duration,
}

impl FileLockManager {
    /// Creates a new instance of `FileLockManager`.
    #[must_use]
    pub fn new(FileLockManagerOptions { retry_interval }: FileLockManagerOptions) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
            retry_interval,
        }
    }

    /// The lock file used for `resource`.
    #[must_use]
    pub fn lock_file_path(resource: &Path) -> PathBuf {
        if resource.is_dir() {
            resource.join(LOCK_FILE_NAME)
        } else {
            resource.to_path_buf()
        }
    }

    fn try_acquire(path: &Path) -> io::Result<Option<File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(file)),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn guard(&self, path: PathBuf, file: File) -> FileLockGuard {
        self.held.lock().insert(path.clone());
        debug!("acquired lock {}", path.display());

        FileLockGuard {
            file: Some(file),
            path,
            held: self.held.clone(),
        }
    }
}

impl Default for FileLockManager {
    fn default() -> Self {
        Self::new(FileLockManagerOptions::default())
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == fs3::lock_contended_error().kind() || error.kind() == ErrorKind::Interrupted
}

/// Guard for a lock taken by `FileLockManager`.
#[derive(Debug)]
pub struct FileLockGuard {
    file: Option<File>,
    path: PathBuf,
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl FileLockGuard {
    /// The lock file this guard holds.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LockGuard for FileLockGuard {
    fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!("failed to unlock {}: {}", self.path.display(), e);
            }
            self.held.lock().remove(&self.path);
            debug!("released lock {}", self.path.display());
        }
    }

    fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl LockManager for FileLockManager {
    type Error = Error;
    type Guard = FileLockGuard;

    async fn check(&self, resource: &Path) -> Result<LockStatus, Self::Error> {
        let path = Self::lock_file_path(resource);

        if self.held.lock().contains(&path) {
            return Ok(LockStatus::HeldBySelf);
        }

        if !path.exists() {
            return Ok(LockStatus::Free);
        }

        match Self::try_acquire(&path) {
            Ok(Some(file)) => {
                FileExt::unlock(&file).map_err(|e| Error::Io("failed to unlock", e))?;
                Ok(LockStatus::Free)
            }
            Ok(None) => Ok(LockStatus::HeldByOther(path.display().to_string())),
            Err(e) => Err(Error::Io("failed to open lock file", e)),
        }
    }

    async fn lock(&self, resource: &Path) -> Result<Self::Guard, Self::Error> {
        let path = Self::lock_file_path(resource);

        loop {
            match Self::try_acquire(&path) {
                Ok(Some(file)) => return Ok(self.guard(path, file)),
                Ok(None) => debug!("waiting for lock {}", path.display()),
                Err(e) => warn!("unable to lock {}, retrying: {}", path.display(), e),
            }

            tokio::time::sleep(self.retry_interval).await;
        }
    }

    async fn try_lock(&self, resource: &Path) -> Result<Option<Self::Guard>, Self::Error> {
        let path = Self::lock_file_path(resource);

        match Self::try_acquire(&path) {
            Ok(Some(file)) => Ok(Some(self.guard(path, file))),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Io("failed to open lock file", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    use assert_matches::assert_matches;
    use tempfile::tempdir;

    fn manager() -> FileLockManager {
        FileLockManager::new(FileLockManagerOptions {
            retry_interval: Duration::from_millis(20),
        })
    }

    #[tokio::test]
    async fn test_directory_lock_uses_lock_file() {
        let dir = tempdir().unwrap();
        let manager = manager();

        let guard = manager.lock(dir.path()).await.unwrap();

        assert_eq!(guard.path(), dir.path().join(LOCK_FILE_NAME));
        assert!(dir.path().join(LOCK_FILE_NAME).exists());
        assert!(guard.is_held());
    }

    #[tokio::test]
    async fn test_check_reports_holder() {
        let dir = tempdir().unwrap();
        let first = manager();
        let second = manager();

        assert_eq!(first.check(dir.path()).await.unwrap(), LockStatus::Free);

        let guard = first.lock(dir.path()).await.unwrap();

        assert_eq!(first.check(dir.path()).await.unwrap(), LockStatus::HeldBySelf);
        assert_matches!(
            second.check(dir.path()).await.unwrap(),
            LockStatus::HeldByOther(_)
        );

        drop(guard);

        assert_eq!(first.check(dir.path()).await.unwrap(), LockStatus::Free);
        assert_eq!(second.check(dir.path()).await.unwrap(), LockStatus::Free);
    }

    #[tokio::test]
    async fn test_try_lock_fails_while_held() {
        let dir = tempdir().unwrap();
        let first = manager();
        let second = manager();

        let guard = first.try_lock(dir.path()).await.unwrap();
        assert!(guard.is_some());

        assert!(second.try_lock(dir.path()).await.unwrap().is_none());

        drop(guard);

        assert!(second.try_lock(dir.path()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = tempdir().unwrap();
        let manager = manager();

        let mut guard = manager.lock(dir.path()).await.unwrap();
        guard.release();
        guard.release();

        assert!(!guard.is_held());
        assert_eq!(manager.check(dir.path()).await.unwrap(), LockStatus::Free);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_waits_for_release() {
        let dir = tempdir().unwrap();
        let first = manager();
        let second = manager();
        let released = Arc::new(AtomicBool::new(false));

        let guard = first.lock(dir.path()).await.unwrap();

        let waiter = {
            let path = dir.path().to_path_buf();
            let released = released.clone();
            tokio::spawn(async move {
                let _guard = second.lock(&path).await.unwrap();
                released.load(Ordering::SeqCst)
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiter.is_finished());

        released.store(true, Ordering::SeqCst);
        drop(guard);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_plain_file_is_its_own_lock() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("resource");
        let manager = manager();

        let guard = manager.lock(&file).await.unwrap();

        assert_eq!(guard.path(), file);
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }
}
