//! Idempotent installation of a shared product archive.
//!
//! A product is unpacked once into a product home shared by every build on
//! the machine. A checksum marker records which archive content was
//! installed, so an unchanged archive is skipped and a changed one is
//! re-installed. The product home is locked while it is being modified and
//! the installed state is checked again once the lock is held.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod artifact;
mod error;
mod marker;
mod unpack;

pub use artifact::{ArtifactScope, ProductArtifact};
pub use error::Error;
pub use marker::{ChecksumMarker, compute_digest};
pub use unpack::{TarUnpacker, Unpacker};

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use testbed_locks::LockManager;
use tracing::{debug, info, warn};

/// Result type for installer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Files that, when present under the product home, mean the product was
/// installed by hand.
pub const DEFAULT_VALIDATION_FILES: [&str; 3] = [
    "distrib/tibco/sb/deploy/sb.kds",
    "distrib/tibco/dtm/deploy/dtm.kds",
    "distrib/tibco/devbin/epadmin",
];

/// Default directory, relative to the product home, holding the markers.
pub const DEFAULT_MARKERS_DIRECTORY: &str = "installation-markers";

const WRITE_CHECK_FILE_NAME: &str = ".write-check";

/// What `ensure_installed` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Nothing needed doing.
    Skipped,

    /// The archive was unpacked for the first time.
    Installed,

    /// A different archive had been installed before and was replaced.
    Reinstalled,
}

#[derive(Debug, PartialEq, Eq)]
enum Assessment {
    UpToDate,
    NeedsInstall,
    Stale,
}

/// Options for configuring a `ProductInstaller`.
pub struct ProductInstallerOptions<L, U = TarUnpacker> {
    /// Lock manager guarding the product home.
    pub lock_manager: L,

    /// Archive extraction.
    pub unpacker: U,

    /// Manual-installation sentinels, relative to the product home.
    pub validation_files: Vec<PathBuf>,
}

impl<L> ProductInstallerOptions<L> {
    /// Options with the tar unpacker and the default sentinels.
    pub fn with_lock_manager(lock_manager: L) -> Self {
        Self {
            lock_manager,
            unpacker: TarUnpacker,
            validation_files: DEFAULT_VALIDATION_FILES.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Installs product archives into a shared product home.
pub struct ProductInstaller<L, U = TarUnpacker>
where
    L: LockManager,
    U: Unpacker,
{
    lock_manager: L,
    unpacker: Arc<U>,
    validation_files: Vec<PathBuf>,
}

impl<L, U> ProductInstaller<L, U>
where
    L: LockManager,
    U: Unpacker,
{
    /// Creates a new instance of `ProductInstaller`.
    #[must_use]
    pub fn new(
        ProductInstallerOptions {
            lock_manager,
            unpacker,
            validation_files,
        }: ProductInstallerOptions<L, U>,
    ) -> Self {
        Self {
            lock_manager,
            unpacker: Arc::new(unpacker),
            validation_files,
        }
    }

    /// Makes sure the content of `source_archive` is installed in
    /// `destination_dir`, using `marker_path` to remember what was installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be written, the lock cannot
    /// be taken or the archive cannot be unpacked. A marker that cannot be
    /// written is only logged.
    pub async fn ensure_installed(
        &self,
        source_archive: &Path,
        destination_dir: &Path,
        marker_path: &Path,
    ) -> Result<InstallOutcome> {
        let marker = ChecksumMarker::new(marker_path);

        if self.assess(source_archive, destination_dir, &marker).await? == Assessment::UpToDate {
            return Ok(InstallOutcome::Skipped);
        }

        // The lock file lives inside the product home, and taking the lock
        // retries forever on I/O errors.
        fs::create_dir_all(destination_dir)
            .map_err(|_| Error::DestinationNotWritable(destination_dir.to_path_buf()))?;
        if !is_writable(destination_dir) {
            return Err(Error::DestinationNotWritable(destination_dir.to_path_buf()));
        }

        let _guard = self
            .lock_manager
            .lock(destination_dir)
            .await
            .map_err(|e| Error::Lock(Box::new(e)))?;

        let assessment = self.assess(source_archive, destination_dir, &marker).await?;
        if assessment == Assessment::UpToDate {
            debug!(
                "{} was installed while waiting for the lock",
                source_archive.display()
            );
            return Ok(InstallOutcome::Skipped);
        }

        if let Some(parent) = marker_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Io("failed to create markers directory", e))?;
        }

        info!(
            "Installing {} to {}",
            source_archive.display(),
            destination_dir.display()
        );

        let archive = source_archive.to_path_buf();
        let destination = destination_dir.to_path_buf();
        let unpacker = self.unpacker.clone();
        let stale = assessment == Assessment::Stale;

        tokio::task::spawn_blocking(move || {
            if stale {
                remove_previous_entries(unpacker.as_ref(), &archive, &destination);
            }

            unpacker
                .unpack(&archive, &destination)
                .map_err(|source| Error::Unpack { archive, source })
        })
        .await??;

        let archive = source_archive.to_path_buf();
        match tokio::task::spawn_blocking(move || compute_digest(&archive)).await? {
            Ok(digest) => {
                if let Err(e) = marker.write(&digest) {
                    warn!(
                        "Unable to write installation marker {}: {}",
                        marker.path().display(),
                        e
                    );
                }
            }
            Err(e) => warn!(
                "Unable to compute checksum of {}: {}",
                source_archive.display(),
                e
            ),
        }

        Ok(if stale {
            InstallOutcome::Reinstalled
        } else {
            InstallOutcome::Installed
        })
    }

    /// Installs every eligible artifact into `product_home`.
    ///
    /// Each distinct group, artifact and version is installed once; repeats
    /// are dropped. Artifacts in `Provided` scope and classified artifacts
    /// are not products and are skipped. Markers live in `markers_directory`,
    /// relative to `product_home`.
    ///
    /// # Errors
    ///
    /// Stops at the first artifact that fails to install.
    pub async fn install_products(
        &self,
        product_home: &Path,
        markers_directory: &Path,
        artifacts: &[ProductArtifact],
    ) -> Result<Vec<(String, InstallOutcome)>> {
        let mut seen = HashSet::new();
        let mut outcomes = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            if !seen.insert((&artifact.group_id, &artifact.artifact_id, &artifact.version)) {
                debug!("Skipping {}, already installed in this run", artifact);
                continue;
            }

            if !artifact.is_product() {
                debug!("Skipping {}, not a product archive", artifact);
                outcomes.push((artifact.artifact_id.clone(), InstallOutcome::Skipped));
                continue;
            }

            let marker = product_home
                .join(markers_directory)
                .join(artifact.marker_file_name());
            let outcome = self
                .ensure_installed(&artifact.path, product_home, &marker)
                .await?;

            outcomes.push((artifact.artifact_id.clone(), outcome));
        }

        Ok(outcomes)
    }

    async fn assess(
        &self,
        source_archive: &Path,
        destination_dir: &Path,
        marker: &ChecksumMarker,
    ) -> Result<Assessment> {
        if !source_archive.exists() {
            debug!(
                "{} has not been fetched yet, nothing to install",
                source_archive.display()
            );
            return Ok(Assessment::UpToDate);
        }

        let mut stale = false;

        match marker.read() {
            Ok(None) => {}
            Ok(Some(recorded)) if recorded.is_empty() => {
                warn!(
                    "Unable to verify checksum of {}, installation marker {} is empty",
                    source_archive.display(),
                    marker.path().display()
                );
                return Ok(Assessment::UpToDate);
            }
            Ok(Some(recorded)) => {
                let archive = source_archive.to_path_buf();
                let current = tokio::task::spawn_blocking(move || compute_digest(&archive))
                    .await?
                    .map_err(|e| Error::Io("failed to compute archive checksum", e))?;

                if current == recorded {
                    debug!("{} is already installed", source_archive.display());
                    return Ok(Assessment::UpToDate);
                }

                info!(
                    "Checksum of {} changed, forcing a reinstall",
                    source_archive.display()
                );
                stale = true;
            }
            Err(e) => {
                warn!(
                    "Unable to verify checksum of {}: {}",
                    source_archive.display(),
                    e
                );
                return Ok(Assessment::UpToDate);
            }
        }

        if !stale {
            if let Some(sentinel) = self
                .validation_files
                .iter()
                .map(|file| destination_dir.join(file))
                .find(|path| path.exists())
            {
                debug!(
                    "Product installed manually, found {}",
                    sentinel.display()
                );
                return Ok(Assessment::UpToDate);
            }
        }

        Ok(if stale {
            Assessment::Stale
        } else {
            Assessment::NeedsInstall
        })
    }
}

fn is_writable(directory: &Path) -> bool {
    let permitted = fs::metadata(directory)
        .map(|metadata| metadata.is_dir() && !metadata.permissions().readonly())
        .unwrap_or(false);
    if !permitted {
        return false;
    }

    let check = directory.join(WRITE_CHECK_FILE_NAME);
    match fs::OpenOptions::new().write(true).create(true).truncate(true).open(&check) {
        Ok(_) => {
            let _ = fs::remove_file(&check);
            true
        }
        Err(e) => {
            debug!("Unable to write to {}: {}", directory.display(), e);
            false
        }
    }
}

fn remove_previous_entries<U: Unpacker>(unpacker: &U, archive: &Path, destination: &Path) {
    let entries = match unpacker.entries(archive) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Unable to list {}: {}", archive.display(), e);
            return;
        }
    };

    for entry in entries {
        if entry
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            continue;
        }

        let path = destination.join(entry);
        if path.is_file() {
            if let Err(e) = fs::remove_file(&path) {
                debug!("Unable to remove {}: {}", path.display(), e);
            }
        }
    }
}
