//! In-memory repository implementation

use super::traits::ArtifactRepository;
use crate::artifact::{ArtifactDescriptor, StoredArtifact};
use crate::error::{StagelineError, StagelineResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// Artifact repository that lives for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemoryArtifactRepository {
    artifacts: RwLock<HashMap<String, Vec<StoredArtifact>>>,
}

impl InMemoryArtifactRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactRepository for InMemoryArtifactRepository {
    fn save_version(&self, artifact: &StoredArtifact) -> StagelineResult<()> {
        let mut artifacts = self.artifacts.write()?;
        let versions = artifacts
            .entry(artifact.descriptor.name.clone())
            .or_default();

        if versions
            .iter()
            .any(|a| a.descriptor.version == artifact.descriptor.version)
        {
            return Err(StagelineError::VersionExists {
                name: artifact.descriptor.name.clone(),
                version: artifact.descriptor.version,
            });
        }

        versions.push(artifact.clone());
        versions.sort_by_key(|a| a.descriptor.version);
        Ok(())
    }

    fn load_version(&self, name: &str, version: u32) -> StagelineResult<Option<StoredArtifact>> {
        Ok(self
            .artifacts
            .read()?
            .get(name)
            .and_then(|versions| versions.iter().find(|a| a.descriptor.version == version))
            .cloned())
    }

    fn list_versions(&self, name: &str) -> StagelineResult<Vec<ArtifactDescriptor>> {
        Ok(self
            .artifacts
            .read()?
            .get(name)
            .map(|versions| versions.iter().map(|a| a.descriptor.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let repo = InMemoryArtifactRepository::new();
        let artifact = StoredArtifact::new("report.html", 1, b"v1".to_vec(), "text/html");
        repo.save_version(&artifact).unwrap();

        let loaded = repo.load_version("report.html", 1).unwrap().unwrap();
        assert_eq!(loaded, artifact);
        assert!(repo.load_version("report.html", 2).unwrap().is_none());
        assert_eq!(repo.latest_version("report.html").unwrap(), Some(1));
    }

    #[test]
    fn test_refuses_overwrite() {
        let repo = InMemoryArtifactRepository::new();
        repo.save_version(&StoredArtifact::new("a", 1, b"x".to_vec(), "text/plain"))
            .unwrap();

        let result = repo.save_version(&StoredArtifact::new("a", 1, b"y".to_vec(), "text/plain"));
        assert!(matches!(result, Err(StagelineError::VersionExists { version: 1, .. })));
        assert_eq!(repo.load_version("a", 1).unwrap().unwrap().content, b"x");
    }
}
