use super::types::{ArtifactDescriptor, NewArtifact, StoredArtifact};
use crate::app_log;
use crate::config::ArtifactBackendConfig;
use crate::error::{StagelineError, StagelineResult};
use crate::logger::LogLevel;
use crate::repository::{ArtifactRepository, RepositoryFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Upper bound on versions tried by one `put` before giving up
const MAX_VERSION_CLAIMS: u32 = 64;

/// Append-only, versioned artifact store
///
/// One sink may be shared by many concurrent runs. `put` calls for the same
/// artifact name are serialized within the sink, and the backend refuses to
/// store a version twice, so every version number is allocated exactly once
/// even when several sinks (or processes) write to the same backend.
#[derive(Clone)]
pub struct ArtifactSink {
    repository: Arc<dyn ArtifactRepository>,
    name_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ArtifactSink {
    /// Create a sink over an existing repository
    pub fn new(repository: Arc<dyn ArtifactRepository>) -> Self {
        Self {
            repository,
            name_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a sink backed by process memory
    pub fn in_memory() -> Self {
        Self::new(RepositoryFactory::create_memory_repository())
    }

    /// Create a sink over the backend selected in configuration
    pub fn from_config(config: &ArtifactBackendConfig) -> Self {
        Self::new(RepositoryFactory::create_artifact_repository(config))
    }

    fn lock_for(&self, name: &str) -> StagelineResult<Arc<Mutex<()>>> {
        let mut locks = self.name_locks.lock()?;
        Ok(locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Drop the lock entry for `name` once no other put holds it
    fn release_lock(&self, name: &str, lock: Arc<Mutex<()>>) -> StagelineResult<()> {
        let mut locks = self.name_locks.lock()?;
        // One reference in the map plus ours
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
        Ok(())
    }

    #[cfg(test)]
    fn tracked_names(&self) -> usize {
        self.name_locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    fn validate_name(name: &str) -> StagelineResult<()> {
        if name.trim().is_empty() || name == "." || name == ".." {
            return Err(StagelineError::StorageSaveFailed(format!(
                "invalid artifact name: {:?}",
                name
            )));
        }
        Ok(())
    }

    /// Store a new version of `name` and return its version number
    pub fn put(
        &self,
        name: &str,
        content: impl Into<Vec<u8>>,
        content_type: &str,
    ) -> StagelineResult<u32> {
        let descriptor = self.put_artifact(NewArtifact::new(name, content, content_type))?;
        Ok(descriptor.version)
    }

    /// Store a new version and return its full descriptor
    pub fn put_artifact(&self, artifact: NewArtifact) -> StagelineResult<ArtifactDescriptor> {
        Self::validate_name(&artifact.name)?;

        let name = artifact.name.clone();
        let name_lock = self.lock_for(&name)?;
        let result = match name_lock.lock() {
            Ok(_guard) => self.store_next_version(artifact),
            Err(e) => Err(e.into()),
        };
        self.release_lock(&name, name_lock)?;
        result
    }

    fn store_next_version(&self, artifact: NewArtifact) -> StagelineResult<ArtifactDescriptor> {
        let next_free = |repository: &dyn ArtifactRepository| -> StagelineResult<u32> {
            Ok(repository
                .last_allocated_version(&artifact.name)?
                .map_or(1, |latest| latest + 1))
        };

        let mut version = next_free(self.repository.as_ref())?;
        let mut stored = StoredArtifact::new(
            artifact.name.clone(),
            version,
            artifact.content,
            artifact.content_type,
        );

        for _ in 0..MAX_VERSION_CLAIMS {
            stored.descriptor.version = version;
            match self.repository.save_version(&stored) {
                Ok(()) => {
                    app_log!(
                        LogLevel::Debug,
                        "artifact",
                        "Stored artifact {} v{} ({} bytes, {})",
                        stored.descriptor.name,
                        version,
                        stored.descriptor.size,
                        stored.descriptor.content_type
                    );
                    return Ok(stored.descriptor);
                }
                Err(StagelineError::VersionExists { .. }) => {
                    // Another writer on the same backend took it
                    app_log!(
                        LogLevel::Debug,
                        "artifact",
                        "Artifact {} v{} already claimed, retrying",
                        stored.descriptor.name,
                        version
                    );
                    version = next_free(self.repository.as_ref())?.max(version + 1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(StagelineError::StorageSaveFailed(format!(
            "could not allocate a version for {} after {} attempts",
            stored.descriptor.name, MAX_VERSION_CLAIMS
        )))
    }

    /// Fetch one version, or the latest when `version` is `None`
    pub fn get(&self, name: &str, version: Option<u32>) -> StagelineResult<StoredArtifact> {
        let not_found = || StagelineError::ArtifactNotFound {
            name: name.to_string(),
            version,
        };

        let version = match version {
            Some(v) => v,
            None => self.repository.latest_version(name)?.ok_or_else(not_found)?,
        };

        self.repository
            .load_version(name, version)?
            .ok_or_else(not_found)
    }

    /// Fetch the latest version of `name`
    pub fn get_latest(&self, name: &str) -> StagelineResult<StoredArtifact> {
        self.get(name, None)
    }

    /// Descriptors of every version of `name`, oldest first
    pub fn list(&self, name: &str) -> StagelineResult<Vec<ArtifactDescriptor>> {
        self.repository.list_versions(name)
    }
}

impl std::fmt::Debug for ArtifactSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactSink").finish_non_exhaustive()
    }
}
