//! Repository trait definitions
//!
//! These traits define the abstract interface for artifact persistence.
//! Different implementations can provide different storage backends.

use crate::artifact::{ArtifactDescriptor, StoredArtifact};
use crate::error::StagelineResult;

/// Durable storage for artifact versions
///
/// Implementations store what they are given and must refuse to overwrite an
/// existing `(name, version)` pair with [`VersionExists`](crate::error::StagelineError::VersionExists).
/// That refusal is what keeps version numbers unique when several sinks (or
/// processes) share one backend: the
/// [`ArtifactSink`](crate::artifact::ArtifactSink) proposes
/// `last_allocated_version + 1` and moves on to the next number when the
/// backend reports it taken.
pub trait ArtifactRepository: Send + Sync {
    /// Persist a new artifact version
    fn save_version(&self, artifact: &StoredArtifact) -> StagelineResult<()>;

    /// Load one version of an artifact
    fn load_version(&self, name: &str, version: u32) -> StagelineResult<Option<StoredArtifact>>;

    /// Descriptors of every version stored under `name`, oldest first
    fn list_versions(&self, name: &str) -> StagelineResult<Vec<ArtifactDescriptor>>;

    /// Highest stored version, if any
    fn latest_version(&self, name: &str) -> StagelineResult<Option<u32>> {
        Ok(self.list_versions(name)?.last().map(|d| d.version))
    }

    /// Highest version number claimed under `name`, including a version
    /// whose save is still in progress or was interrupted
    ///
    /// Backends that publish a version in more than one step override this;
    /// by default it is the latest fully stored version.
    fn last_allocated_version(&self, name: &str) -> StagelineResult<Option<u32>> {
        self.latest_version(name)
    }

    /// Check if any version exists for `name`
    fn has_artifact(&self, name: &str) -> StagelineResult<bool> {
        Ok(!self.list_versions(name)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyRepo;

    impl ArtifactRepository for EmptyRepo {
        fn save_version(&self, _artifact: &StoredArtifact) -> StagelineResult<()> {
            Ok(())
        }

        fn load_version(&self, _name: &str, _version: u32) -> StagelineResult<Option<StoredArtifact>> {
            Ok(None)
        }

        fn list_versions(&self, _name: &str) -> StagelineResult<Vec<ArtifactDescriptor>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_default_methods() {
        let repo = EmptyRepo;
        assert!(!repo.has_artifact("report.html").unwrap());
        assert_eq!(repo.latest_version("report.html").unwrap(), None);
        assert_eq!(repo.last_allocated_version("report.html").unwrap(), None);
    }
}
