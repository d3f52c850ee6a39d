use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of an artifact's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    pub algorithm: String,
    pub value: String,
}

impl ContentHash {
    /// Calculate SHA-256 hash of data in memory
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);

        Self {
            algorithm: "SHA-256".to_string(),
            value: hex::encode(hasher.finalize()),
        }
    }

    /// Check that `data` hashes to this digest
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::from_bytes(data).value == self.value
    }
}
