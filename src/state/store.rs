use super::snapshot::{RunProgress, StateSnapshot};
use super::view::StateView;
use crate::error::{StagelineError, StagelineResult};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Writer name recorded for entries supplied by the caller before the run
pub const INPUT_WRITER: &str = "input";

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    written_by: String,
}

#[derive(Debug, Default)]
struct StateInner {
    entries: HashMap<String, Entry>,
    progress: RunProgress,
}

/// Shared key/value state for one pipeline run
///
/// Cloning a `StateStore` yields another handle to the same entries, which is
/// how external observers poll a run while it executes. Each `set` happens
/// under a write lock, so readers never observe a partially applied write.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<StateInner>>,
}

impl StateStore {
    /// Create an empty state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state store seeded with caller-supplied inputs
    pub fn with_inputs<I, K>(inputs: I) -> StagelineResult<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let store = Self::new();
        for (key, value) in inputs {
            store.set(key, value, INPUT_WRITER)?;
        }
        Ok(store)
    }

    /// Get a copy of the value stored under `key`
    pub fn get(&self, key: &str) -> StagelineResult<Value> {
        self.inner
            .read()?
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| StagelineError::KeyNotFound(key.to_string()))
    }

    /// Write `key` once
    ///
    /// `writer` names the stage, hook or input that performs the write. A
    /// second write to the same key fails with `KeyConflict`, leaving the
    /// original value in place.
    pub fn set(&self, key: impl Into<String>, value: Value, writer: &str) -> StagelineResult<()> {
        let key = key.into();
        let mut inner = self.inner.write()?;

        if let Some(existing) = inner.entries.get(&key) {
            return Err(StagelineError::KeyConflict {
                key,
                stage: writer.to_string(),
                written_by: existing.written_by.clone(),
            });
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                written_by: writer.to_string(),
            },
        );
        Ok(())
    }

    /// Check if a key exists
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.entries.contains_key(key))
            .unwrap_or(false)
    }

    /// Name of whoever wrote `key`
    pub fn writer_of(&self, key: &str) -> Option<String> {
        self.inner
            .read()
            .ok()?
            .entries
            .get(key)
            .map(|entry| entry.written_by.clone())
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .read()
            .map(|inner| inner.entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Keys from `required` that are not present
    pub fn missing_keys(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|key| !self.contains(key))
            .cloned()
            .collect()
    }

    /// Immutable copy of every entry plus progress metadata
    pub fn snapshot(&self) -> StagelineResult<StateSnapshot> {
        let inner = self.inner.read()?;
        let entries: BTreeMap<String, Value> = inner
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();

        Ok(StateSnapshot {
            entries,
            progress: inner.progress.clone(),
            taken_at: Utc::now(),
        })
    }

    /// Read-only view handed to stage bodies
    pub fn view(&self) -> StateView {
        StateView::new(self.clone())
    }

    /// Current progress record
    pub fn progress(&self) -> StagelineResult<RunProgress> {
        Ok(self.inner.read()?.progress.clone())
    }

    /// Record the stage that is about to execute (`None` once the run ends)
    pub fn set_current_stage(&self, stage: Option<&str>) -> StagelineResult<()> {
        self.inner.write()?.progress.current_stage = stage.map(str::to_string);
        Ok(())
    }

    /// Append a stage to the completed list
    pub fn complete_stage(&self, stage: &str) -> StagelineResult<()> {
        let mut inner = self.inner.write()?;
        inner.progress.completed_stages.push(stage.to_string());
        if inner.progress.current_stage.as_deref() == Some(stage) {
            inner.progress.current_stage = None;
        }
        Ok(())
    }
}
