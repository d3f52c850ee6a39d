use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing one stored artifact version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub name: String,

    /// Starts at 1, increases by exactly 1 per `put` under the same name
    pub version: u32,

    pub content_type: String,

    /// Content size in bytes
    pub size: u64,

    pub sha256: ContentHash,

    pub created_at: DateTime<Utc>,
}

/// A stored artifact version together with its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub descriptor: ArtifactDescriptor,
    pub content: Vec<u8>,
}

impl StoredArtifact {
    pub fn new(name: impl Into<String>, version: u32, content: Vec<u8>, content_type: impl Into<String>) -> Self {
        let descriptor = ArtifactDescriptor {
            name: name.into(),
            version,
            content_type: content_type.into(),
            size: content.len() as u64,
            sha256: ContentHash::from_bytes(&content),
            created_at: Utc::now(),
        };
        Self {
            descriptor,
            content,
        }
    }

    /// Content decoded as UTF-8, if it is valid text
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// An artifact produced by a stage, not yet assigned a version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifact {
    pub name: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

impl NewArtifact {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    pub fn text(name: impl Into<String>, text: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::new(name, text.into().into_bytes(), content_type)
    }

    pub fn json(name: impl Into<String>, value: &serde_json::Value) -> Self {
        let content = serde_json::to_vec_pretty(value).unwrap_or_default();
        Self::new(name, content, "application/json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stored_artifact_descriptor() {
        let artifact = StoredArtifact::new("report.html", 1, b"<h1>ok</h1>".to_vec(), "text/html");
        assert_eq!(artifact.descriptor.size, 11);
        assert!(artifact.descriptor.sha256.matches(b"<h1>ok</h1>"));
        assert_eq!(artifact.as_text(), Some("<h1>ok</h1>"));
    }

    #[test]
    fn test_new_artifact_json() {
        let artifact = NewArtifact::json("summary.json", &json!({"zones": 3}));
        assert_eq!(artifact.content_type, "application/json");
        let parsed: serde_json::Value = serde_json::from_slice(&artifact.content).unwrap();
        assert_eq!(parsed["zones"], 3);
    }
}
