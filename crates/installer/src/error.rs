use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while installing a product.
#[derive(Debug, Error)]
pub enum Error {
    /// The destination could not be created or is read-only.
    #[error("the product directory {0} cannot be written to")]
    DestinationNotWritable(PathBuf),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A blocking task panicked or was cancelled.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// The product directory lock could not be taken.
    #[error("failed to lock the product directory: {0}")]
    Lock(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The archive is corrupt or vanished while being extracted.
    #[error("failed to unpack {archive}: {source}")]
    Unpack {
        /// The archive being unpacked.
        archive: PathBuf,

        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },
}
