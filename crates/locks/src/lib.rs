//! Abstract interface for exclusive locks over filesystem resources.
//!
//! Product installation is serialised across processes by locking the
//! product directory. Implementations decide how the lock is materialised
//! (an OS file lock, an in-process table, ...).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;

/// Marker trait for `LockManager` errors
pub trait LockManagerError: Debug + Error + Send + Sync + 'static {}

/// Represents the current status of a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// The lock is free.
    Free,

    /// The lock is held elsewhere, described by the String.
    HeldByOther(String),

    /// The lock is held by the current manager.
    HeldBySelf,
}

/// A held lock.
///
/// Dropping the guard releases the lock. `release` may be called explicitly
/// and any number of times; only the first call has an effect.
pub trait LockGuard: Send + Sync + 'static {
    /// Releases the lock if it is still held.
    fn release(&mut self);

    /// Whether the lock is still held by this guard.
    fn is_held(&self) -> bool;
}

/// A lock manager keyed by filesystem paths.
///
/// A path naming a directory is locked through a `.lock` file inside it; any
/// other path is used as the lock file itself.
#[async_trait]
pub trait LockManager: Send + Sync + 'static {
    /// The error type for lock operations.
    type Error: LockManagerError;

    /// The guard type that releases the lock on drop.
    type Guard: LockGuard;

    /// Checks the status of a lock without acquiring it.
    ///
    /// # Arguments
    /// * `resource`: The path of the resource.
    async fn check(&self, resource: &Path) -> Result<LockStatus, Self::Error>;

    /// Acquires a lock, waiting indefinitely until it becomes available.
    ///
    /// On successful acquisition, returns a lock guard. The lock is
    /// released when the guard is dropped.
    ///
    /// # Arguments
    /// * `resource`: The path of the resource to be locked.
    async fn lock(&self, resource: &Path) -> Result<Self::Guard, Self::Error>;

    /// Attempts to acquire a lock without waiting.
    ///
    /// If the lock is acquired successfully, returns `Ok(Some(Guard))`.
    /// If the lock is currently held elsewhere, returns `Ok(None)`.
    ///
    /// # Arguments
    /// * `resource`: The path of the resource to be locked.
    async fn try_lock(&self, resource: &Path) -> Result<Option<Self::Guard>, Self::Error>;
}
