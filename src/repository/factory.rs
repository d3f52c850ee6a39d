//! Repository factory for creating repository instances
//!
//! This factory provides a centralized way to create repository instances
//! with the appropriate backend based on configuration.

use super::file::FileArtifactRepository;
use super::memory::InMemoryArtifactRepository;
use super::traits::ArtifactRepository;
use crate::config::ArtifactBackendConfig;
use std::path::PathBuf;
use std::sync::Arc;

/// Repository factory for creating repository instances
pub struct RepositoryFactory;

impl RepositoryFactory {
    /// Create the artifact repository selected by `config`
    pub fn create_artifact_repository(config: &ArtifactBackendConfig) -> Arc<dyn ArtifactRepository> {
        match config {
            ArtifactBackendConfig::Memory => Self::create_memory_repository(),
            ArtifactBackendConfig::Filesystem { root } => Self::create_file_repository(root.clone()),
        }
    }

    /// Create an in-memory artifact repository
    pub fn create_memory_repository() -> Arc<dyn ArtifactRepository> {
        Arc::new(InMemoryArtifactRepository::new())
    }

    /// Create a file-based artifact repository
    ///
    /// # Arguments
    /// * `root` - Directory holding one sub-directory per artifact name
    pub fn create_file_repository(root: PathBuf) -> Arc<dyn ArtifactRepository> {
        Arc::new(FileArtifactRepository::new(root))
    }
}
