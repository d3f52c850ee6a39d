use super::snapshot::{RunProgress, StateSnapshot};
use super::store::StateStore;
use crate::error::{StagelineError, StagelineResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Read-only access to a run's state
///
/// Stage bodies receive a `StateView` rather than the store itself: a stage
/// returns its output and the runner performs the write, so a failing stage
/// never leaves a partial write behind.
#[derive(Debug, Clone)]
pub struct StateView {
    store: StateStore,
}

impl StateView {
    pub(crate) fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Get a value or return an error if not found
    pub fn get(&self, key: &str) -> StagelineResult<Value> {
        self.store.get(key)
    }

    /// Get a value if present
    pub fn get_opt(&self, key: &str) -> Option<Value> {
        self.store.get(key).ok()
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    /// Get a string value
    pub fn get_string(&self, key: &str) -> StagelineResult<String> {
        match self.get(key)? {
            Value::String(s) => Ok(s),
            _ => Err(StagelineError::TypeMismatch {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    /// Get a boolean value
    pub fn get_bool(&self, key: &str) -> StagelineResult<bool> {
        match self.get(key)? {
            Value::Bool(b) => Ok(b),
            _ => Err(StagelineError::TypeMismatch {
                key: key.to_string(),
                expected: "boolean",
            }),
        }
    }

    /// Get a number value
    pub fn get_number(&self, key: &str) -> StagelineResult<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64().ok_or_else(|| StagelineError::TypeMismatch {
                key: key.to_string(),
                expected: "finite number",
            }),
            _ => Err(StagelineError::TypeMismatch {
                key: key.to_string(),
                expected: "number",
            }),
        }
    }

    /// Get a list value
    pub fn get_list(&self, key: &str) -> StagelineResult<Vec<Value>> {
        match self.get(key)? {
            Value::Array(items) => Ok(items),
            _ => Err(StagelineError::TypeMismatch {
                key: key.to_string(),
                expected: "list",
            }),
        }
    }

    /// Deserialize a structured value into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> StagelineResult<T> {
        Ok(serde_json::from_value(self.get(key)?)?)
    }

    pub fn snapshot(&self) -> StagelineResult<StateSnapshot> {
        self.store.snapshot()
    }

    pub fn progress(&self) -> StagelineResult<RunProgress> {
        self.store.progress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn seeded() -> StateView {
        let store = StateStore::new();
        store.set("name", json!("bakery"), "input").unwrap();
        store.set("open", json!(true), "input").unwrap();
        store.set("radius", json!(1.5), "input").unwrap();
        store.set("zones", json!(["north", "south"]), "input").unwrap();
        store
            .set("place", json!({"name": "Cafe", "rating": 4.5}), "input")
            .unwrap();
        store.view()
    }

    #[test]
    fn test_typed_getters() {
        let view = seeded();
        assert_eq!(view.get_string("name").unwrap(), "bakery");
        assert!(view.get_bool("open").unwrap());
        assert_eq!(view.get_number("radius").unwrap(), 1.5);
        assert_eq!(view.get_list("zones").unwrap().len(), 2);
    }

    #[test]
    fn test_wrong_type() {
        let view = seeded();
        let result = view.get_bool("name");
        assert!(matches!(
            result,
            Err(StagelineError::TypeMismatch { expected: "boolean", .. })
        ));
    }

    #[test]
    fn test_get_as_struct() {
        #[derive(Deserialize)]
        struct Place {
            name: String,
            rating: f64,
        }

        let place: Place = seeded().get_as("place").unwrap();
        assert_eq!(place.name, "Cafe");
        assert_eq!(place.rating, 4.5);
    }

    #[test]
    fn test_get_opt() {
        let view = seeded();
        assert!(view.get_opt("missing").is_none());
        assert!(view.has("name"));
    }
}
