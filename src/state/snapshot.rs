use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Progress of a run, as recorded by hooks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Stage currently executing
    pub current_stage: Option<String>,

    /// Stages that finished successfully, in execution order
    pub completed_stages: Vec<String>,
}

impl RunProgress {
    pub fn is_completed(&self, stage: &str) -> bool {
        self.completed_stages.iter().any(|s| s == stage)
    }
}

/// Point-in-time copy of a state store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub entries: BTreeMap<String, Value>,
    pub progress: RunProgress,
    pub taken_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries as a single JSON object (template data, serialization)
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_json() {
        let mut entries = BTreeMap::new();
        entries.insert("id".to_string(), json!("loc-1"));
        entries.insert("score".to_string(), json!(0.8));

        let snapshot = StateSnapshot {
            entries,
            progress: RunProgress::default(),
            taken_at: Utc::now(),
        };

        assert_eq!(snapshot.to_json(), json!({"id": "loc-1", "score": 0.8}));
        assert_eq!(snapshot.keys(), vec!["id", "score"]);
    }

    #[test]
    fn test_progress_is_completed() {
        let progress = RunProgress {
            current_stage: None,
            completed_stages: vec!["fetch".to_string()],
        };
        assert!(progress.is_completed("fetch"));
        assert!(!progress.is_completed("report"));
    }
}
