//! File-based repository implementation
//!
//! Layout under the repository root:
//!
//! ```text
//! <root>/<encoded artifact name>/v1.bin
//! <root>/<encoded artifact name>/v1.json   (ArtifactDescriptor)
//! ```
//!
//! A version is claimed by exclusively creating its `.bin` file and becomes
//! visible once its `.json` descriptor is renamed into place.

use super::traits::ArtifactRepository;
use crate::artifact::{ArtifactDescriptor, StoredArtifact};
use crate::error::{StagelineError, StagelineResult};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Filesystem-backed artifact repository
pub struct FileArtifactRepository {
    root: PathBuf,
}

impl FileArtifactRepository {
    /// Create a repository rooted at `root` (created lazily on first save)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, name: &str) -> PathBuf {
        let encoded: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
        self.root.join(encoded)
    }

    fn content_path(&self, name: &str, version: u32) -> PathBuf {
        self.artifact_dir(name).join(format!("v{}.bin", version))
    }

    fn descriptor_path(&self, name: &str, version: u32) -> PathBuf {
        self.artifact_dir(name).join(format!("v{}.json", version))
    }

    /// `N` for a file named `v<N>.bin` or `v<N>.json`
    fn version_of(path: &Path) -> Option<u32> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("bin") | Some("json") => {}
            _ => return None,
        }
        path.file_stem()?.to_str()?.strip_prefix('v')?.parse().ok()
    }

    fn read_descriptor(path: &Path) -> StagelineResult<ArtifactDescriptor> {
        let bytes = fs::read(path).map_err(|e| {
            StagelineError::StorageLoadFailed(format!("{}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl ArtifactRepository for FileArtifactRepository {
    fn save_version(&self, artifact: &StoredArtifact) -> StagelineResult<()> {
        let descriptor = &artifact.descriptor;
        let dir = self.artifact_dir(&descriptor.name);
        fs::create_dir_all(&dir).map_err(|e| {
            StagelineError::StorageSaveFailed(format!("{}: {}", dir.display(), e))
        })?;

        // Creating the content file claims the version; create_new makes the
        // claim exclusive across sinks and processes sharing this root
        let content_path = self.content_path(&descriptor.name, descriptor.version);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&content_path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StagelineError::VersionExists {
                    name: descriptor.name.clone(),
                    version: descriptor.version,
                },
                _ => StagelineError::StorageSaveFailed(format!(
                    "{}: {}",
                    content_path.display(),
                    e
                )),
            })?;
        file.write_all(&artifact.content)?;
        file.sync_all()?;

        // Descriptor is published last, by rename, so a listed version is
        // always complete
        let descriptor_path = self.descriptor_path(&descriptor.name, descriptor.version);
        let staging_path = descriptor_path.with_extension("json.tmp");
        fs::write(&staging_path, serde_json::to_vec_pretty(descriptor)?)
            .and_then(|_| fs::rename(&staging_path, &descriptor_path))
            .map_err(|e| {
                StagelineError::StorageSaveFailed(format!("{}: {}", descriptor_path.display(), e))
            })?;

        Ok(())
    }

    fn load_version(&self, name: &str, version: u32) -> StagelineResult<Option<StoredArtifact>> {
        let descriptor_path = self.descriptor_path(name, version);
        if !descriptor_path.exists() {
            return Ok(None);
        }

        let descriptor = Self::read_descriptor(&descriptor_path)?;
        let content_path = self.content_path(name, version);
        let content = fs::read(&content_path).map_err(|e| {
            StagelineError::StorageLoadFailed(format!("{}: {}", content_path.display(), e))
        })?;

        if !descriptor.sha256.matches(&content) {
            return Err(StagelineError::IntegrityCheckFailed {
                name: name.to_string(),
                version,
                expected: descriptor.sha256.value.clone(),
                actual: crate::hash::ContentHash::from_bytes(&content).value,
            });
        }

        Ok(Some(StoredArtifact {
            descriptor,
            content,
        }))
    }

    fn list_versions(&self, name: &str) -> StagelineResult<Vec<ArtifactDescriptor>> {
        let dir = self.artifact_dir(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StagelineError::StorageLoadFailed(format!(
                    "{}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut descriptors = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                descriptors.push(Self::read_descriptor(&path)?);
            }
        }

        descriptors.sort_by_key(|d| d.version);
        Ok(descriptors)
    }

    /// Counts content files without a descriptor too, so a save that died
    /// between its two writes never hands out the same number again
    fn last_allocated_version(&self, name: &str) -> StagelineResult<Option<u32>> {
        let dir = self.artifact_dir(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StagelineError::StorageLoadFailed(format!(
                    "{}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut highest = None;
        for entry in entries {
            if let Some(version) = Self::version_of(&entry?.path()) {
                highest = highest.max(Some(version));
            }
        }
        Ok(highest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_list() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileArtifactRepository::new(temp_dir.path());

        repo.save_version(&StoredArtifact::new("report.html", 1, b"one".to_vec(), "text/html"))
            .unwrap();
        repo.save_version(&StoredArtifact::new("report.html", 2, b"two".to_vec(), "text/html"))
            .unwrap();

        let versions = repo.list_versions("report.html").unwrap();
        assert_eq!(versions.iter().map(|d| d.version).collect::<Vec<_>>(), vec![1, 2]);

        let loaded = repo.load_version("report.html", 2).unwrap().unwrap();
        assert_eq!(loaded.content, b"two");
        assert_eq!(loaded.descriptor.content_type, "text/html");
    }

    #[test]
    fn test_unknown_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileArtifactRepository::new(temp_dir.path().join("not-created-yet"));

        assert!(repo.list_versions("missing").unwrap().is_empty());
        assert!(repo.load_version("missing", 1).unwrap().is_none());
    }

    #[test]
    fn test_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileArtifactRepository::new(temp_dir.path());

        repo.save_version(&StoredArtifact::new("a", 1, b"x".to_vec(), "text/plain"))
            .unwrap();
        let result = repo.save_version(&StoredArtifact::new("a", 1, b"y".to_vec(), "text/plain"));

        assert!(matches!(result, Err(StagelineError::VersionExists { version: 1, .. })));
        assert_eq!(repo.load_version("a", 1).unwrap().unwrap().content, b"x");
    }

    #[test]
    fn test_orphan_content_counts_as_allocated() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileArtifactRepository::new(temp_dir.path());

        // Content written, descriptor never made it
        fs::create_dir_all(repo.artifact_dir("report.html")).unwrap();
        fs::write(repo.content_path("report.html", 1), b"partial").unwrap();

        assert_eq!(repo.latest_version("report.html").unwrap(), None);
        assert!(repo.list_versions("report.html").unwrap().is_empty());
        assert_eq!(repo.last_allocated_version("report.html").unwrap(), Some(1));
        assert!(repo.load_version("report.html", 1).unwrap().is_none());
    }

    #[test]
    fn test_no_staging_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileArtifactRepository::new(temp_dir.path());
        repo.save_version(&StoredArtifact::new("a.txt", 1, b"x".to_vec(), "text/plain"))
            .unwrap();

        let mut files: Vec<String> = fs::read_dir(repo.artifact_dir("a.txt"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["v1.bin", "v1.json"]);
    }

    #[test]
    fn test_version_of_ignores_other_files() {
        assert_eq!(FileArtifactRepository::version_of(Path::new("v12.bin")), Some(12));
        assert_eq!(FileArtifactRepository::version_of(Path::new("v3.json")), Some(3));
        assert_eq!(FileArtifactRepository::version_of(Path::new("v3.tmp")), None);
        assert_eq!(FileArtifactRepository::version_of(Path::new("notes.json")), None);
    }

    #[test]
    fn test_detects_tampered_content() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileArtifactRepository::new(temp_dir.path());

        repo.save_version(&StoredArtifact::new("data.json", 1, b"{}".to_vec(), "application/json"))
            .unwrap();
        fs::write(repo.content_path("data.json", 1), b"{\"x\":1}").unwrap();

        let result = repo.load_version("data.json", 1);
        assert!(matches!(
            result,
            Err(StagelineError::IntegrityCheckFailed { version: 1, .. })
        ));
    }

    #[test]
    fn test_names_are_encoded() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FileArtifactRepository::new(temp_dir.path());

        repo.save_version(&StoredArtifact::new("reports/q1 summary", 1, b"x".to_vec(), "text/plain"))
            .unwrap();

        // Slash does not create a nested directory
        let dirs: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(dirs.len(), 1);
        assert!(repo.has_artifact("reports/q1 summary").unwrap());
    }
}
