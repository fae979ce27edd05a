use std::fmt;
use std::path::{Path, PathBuf};

/// Dependency scope of a build artifact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArtifactScope {
    /// Needed to compile and run.
    #[default]
    Compile,

    /// Supplied by the runtime; never installed.
    Provided,

    /// Needed at run time only.
    Runtime,

    /// Needed by tests only.
    Test,
}

/// A product archive resolved by the surrounding build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductArtifact {
    /// Group the artifact belongs to.
    pub group_id: String,

    /// Artifact name; also names the installation marker.
    pub artifact_id: String,

    /// Artifact version.
    pub version: String,

    /// Classifier, if any. Classified artifacts are not products.
    pub classifier: Option<String>,

    /// Dependency scope.
    pub scope: ArtifactScope,

    /// Where the archive was fetched to. May not exist yet.
    pub path: PathBuf,
}

impl ProductArtifact {
    /// Describes an archive on disk, naming it after its file name.
    ///
    /// `product-1.2.tar.gz` is named `product-1.2`.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let artifact_id = archive_name(&path);

        Self {
            group_id: String::new(),
            artifact_id,
            version: String::new(),
            classifier: None,
            scope: ArtifactScope::default(),
            path,
        }
    }

    /// Whether this artifact should be installed into the product home.
    #[must_use]
    pub fn is_product(&self) -> bool {
        self.scope != ArtifactScope::Provided && self.classifier.is_none()
    }

    /// Name of the marker file recording this artifact's checksum.
    #[must_use]
    pub fn marker_file_name(&self) -> String {
        format!("{}.marker", self.artifact_id)
    }
}

impl fmt::Display for ProductArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        Ok(())
    }
}

fn archive_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    for suffix in [".tar.gz", ".tgz", ".tar"] {
        if let Some(stem) = file_name.strip_suffix(suffix) {
            return stem.to_string();
        }
    }

    file_name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_from_archive_path() {
        assert_eq!(
            ProductArtifact::from_path("/repo/platform-11.0.tar.gz").artifact_id,
            "platform-11.0"
        );
        assert_eq!(
            ProductArtifact::from_path("platform.tgz").marker_file_name(),
            "platform.marker"
        );
    }

    #[test]
    fn test_provided_and_classified_are_not_products() {
        let mut artifact = ProductArtifact::from_path("platform.tgz");
        assert!(artifact.is_product());

        artifact.scope = ArtifactScope::Provided;
        assert!(!artifact.is_product());

        artifact.scope = ArtifactScope::Compile;
        artifact.classifier = Some("sources".to_string());
        assert!(!artifact.is_product());
    }
}
