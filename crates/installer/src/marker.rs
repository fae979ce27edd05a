use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

/// Computes the content digest of `path` as uppercase hex.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;

    Ok(hex::encode_upper(hasher.finalize()))
}

/// A file holding the digest of the archive last installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChecksumMarker {
    path: PathBuf,
}

impl ChecksumMarker {
    /// Creates a marker handle. Nothing is touched on disk.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored digest.
    ///
    /// Returns `Ok(None)` when the marker does not exist and `Ok(Some(""))`
    /// when it exists but is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker exists but cannot be read.
    pub fn read(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replaces the stored digest, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be written.
    pub fn write(&self, digest: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.path, digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn test_digest_is_uppercase_md5() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("hello");
        fs::write(&file, "hello").unwrap();

        assert_eq!(
            compute_digest(&file).unwrap(),
            "5D41402ABC4B2A76B9719D911017C592"
        );
    }

    #[test]
    fn test_marker_round_trip() {
        let dir = tempdir().unwrap();
        let marker = ChecksumMarker::new(dir.path().join("markers").join("product.marker"));

        assert_eq!(marker.read().unwrap(), None);

        marker.write("ABC").unwrap();
        assert_eq!(marker.read().unwrap().as_deref(), Some("ABC"));

        marker.write("DEF").unwrap();
        assert_eq!(fs::read_to_string(marker.path()).unwrap(), "DEF");
    }

    #[test]
    fn test_empty_marker_reads_as_empty_digest() {
        let dir = tempdir().unwrap();
        let marker = ChecksumMarker::new(dir.path().join("product.marker"));
        fs::write(marker.path(), "\n").unwrap();

        assert_eq!(marker.read().unwrap().as_deref(), Some(""));
    }
}
