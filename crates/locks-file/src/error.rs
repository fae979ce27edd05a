use testbed_locks::LockManagerError;
use thiserror::Error;

/// Errors that can occur while checking or taking a file lock.
#[derive(Debug, Error)]
pub enum Error {
    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),
}

impl LockManagerError for Error {}
