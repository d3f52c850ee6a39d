use crate::error::{StagelineError, StagelineResult};
use crate::pipeline::{Stage, StageDescriptor, StageOutput};
use crate::state::StateView;
use async_trait::async_trait;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
struct Field {
    name: String,
    source_key: String,
    pointer: String,
    optional: bool,
}

/// Stage that assembles a JSON object from parts of earlier outputs
///
/// Each field is read from a state key and narrowed with a JSON pointer
/// (RFC 6901, `""` selects the whole value). Source keys are added to the
/// descriptor's required inputs automatically.
///
/// # Example
/// ```
/// use stageline::pipeline::stages::ProjectStage;
///
/// let stage = ProjectStage::new("shape", "shaped")
///     .field("city", "location", "/address/city")
///     .optional_field("rating", "place", "/rating");
/// ```
#[derive(Debug, Clone)]
pub struct ProjectStage {
    descriptor: StageDescriptor,
    fields: Vec<Field>,
}

impl ProjectStage {
    pub fn new(name: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            descriptor: StageDescriptor::new(name, output_key),
            fields: Vec::new(),
        }
    }

    /// Required field; the run fails if the pointer matches nothing
    pub fn field(
        self,
        name: impl Into<String>,
        source_key: impl Into<String>,
        pointer: impl Into<String>,
    ) -> Self {
        self.push(name.into(), source_key.into(), pointer.into(), false)
    }

    /// Field that becomes `null` when the pointer matches nothing
    pub fn optional_field(
        self,
        name: impl Into<String>,
        source_key: impl Into<String>,
        pointer: impl Into<String>,
    ) -> Self {
        self.push(name.into(), source_key.into(), pointer.into(), true)
    }

    fn push(mut self, name: String, source_key: String, pointer: String, optional: bool) -> Self {
        self.descriptor = self.descriptor.requires([source_key.clone()]);
        self.fields.push(Field {
            name,
            source_key,
            pointer,
            optional,
        });
        self
    }
}

#[async_trait]
impl Stage for ProjectStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &StateView) -> StagelineResult<StageOutput> {
        let mut object = Map::new();

        for field in &self.fields {
            let source = state.get(&field.source_key)?;
            let value = match source.pointer(&field.pointer) {
                Some(value) => value.clone(),
                None if field.optional => Value::Null,
                None => {
                    return Err(StagelineError::KeyNotFound(format!(
                        "{}{}",
                        field.source_key, field.pointer
                    )))
                }
            };
            object.insert(field.name.clone(), value);
        }

        Ok(StageOutput::new(Value::Object(object)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use serde_json::json;

    fn store() -> StateStore {
        StateStore::with_inputs([(
            "place",
            json!({"name": "Cafe Uno", "address": {"city": "Lisbon"}, "tags": ["coffee"]}),
        )])
        .unwrap()
    }

    #[tokio::test]
    async fn test_project_fields() {
        let stage = ProjectStage::new("shape", "shaped")
            .field("city", "place", "/address/city")
            .field("first_tag", "place", "/tags/0")
            .field("whole", "place", "")
            .optional_field("rating", "place", "/rating");

        assert_eq!(stage.descriptor().requires, vec!["place"]);

        let output = stage.run(&store().view()).await.unwrap();
        assert_eq!(output.value["city"], json!("Lisbon"));
        assert_eq!(output.value["first_tag"], json!("coffee"));
        assert_eq!(output.value["whole"]["name"], json!("Cafe Uno"));
        assert_eq!(output.value["rating"], Value::Null);
    }

    #[tokio::test]
    async fn test_missing_required_pointer() {
        let stage = ProjectStage::new("shape", "shaped").field("zip", "place", "/address/zip");

        let err = stage.run(&store().view()).await.unwrap_err();
        assert!(matches!(err, StagelineError::KeyNotFound(path) if path == "place/address/zip"));
    }
}
