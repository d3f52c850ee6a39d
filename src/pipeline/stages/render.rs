use crate::artifact::NewArtifact;
use crate::error::StagelineResult;
use crate::logger::{LogLevel, LOGGER};
use crate::pipeline::{Stage, StageDescriptor, StageOutput};
use crate::state::StateView;
use async_trait::async_trait;
use handlebars::Handlebars;
use serde_json::Value;

const TEMPLATE_NAME: &str = "stage";

/// Stage that renders a Handlebars template against the run's state
///
/// Every state key is available to the template by name. The rendered text
/// becomes the stage's output value and, when configured, an artifact.
///
/// # Example
/// ```
/// use stageline::pipeline::stages::RenderStage;
///
/// let stage = RenderStage::new("report", "report_html", "<h1>{{summary.title}}</h1>")
///     .unwrap()
///     .requires(["summary"])
///     .artifact("report.html", "text/html");
/// ```
pub struct RenderStage {
    descriptor: StageDescriptor,
    registry: Handlebars<'static>,
    artifact: Option<(String, String)>,
}

impl RenderStage {
    /// Compile `template`; fails with `Template` on syntax errors
    pub fn new(
        name: impl Into<String>,
        output_key: impl Into<String>,
        template: &str,
    ) -> StagelineResult<Self> {
        let mut registry = Handlebars::new();
        registry.register_template_string(TEMPLATE_NAME, template)?;

        Ok(Self {
            descriptor: StageDescriptor::new(name, output_key),
            registry,
            artifact: None,
        })
    }

    pub fn requires<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor = self.descriptor.requires(keys);
        self
    }

    /// Also store the rendered text as artifact `name`
    pub fn artifact(mut self, name: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.artifact = Some((name.into(), content_type.into()));
        self
    }

    /// Fail on references to missing fields instead of rendering them empty
    pub fn strict(mut self, strict: bool) -> Self {
        self.registry.set_strict_mode(strict);
        self
    }

    /// Disable HTML escaping (for plain text or markdown output)
    pub fn raw(mut self) -> Self {
        self.registry.register_escape_fn(handlebars::no_escape);
        self
    }
}

#[async_trait]
impl Stage for RenderStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &StateView) -> StagelineResult<StageOutput> {
        let data = state.snapshot()?.to_json();
        let rendered = self.registry.render(TEMPLATE_NAME, &data)?;

        LOGGER.log(
            LogLevel::Debug,
            &format!(
                "Rendered {} bytes for stage '{}'",
                rendered.len(),
                self.descriptor.name
            ),
            "pipeline::render",
        );

        let mut output = StageOutput::new(Value::String(rendered.clone()));
        if let Some((name, content_type)) = &self.artifact {
            output = output.with_artifact(NewArtifact::text(name, rendered, content_type));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagelineError;
    use crate::state::StateStore;
    use serde_json::json;

    fn store() -> StateStore {
        StateStore::with_inputs([
            ("title", json!("Q3 <draft>")),
            ("items", json!(["a", "b"])),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_render_escapes_html() {
        let stage = RenderStage::new("report", "report_html", "<h1>{{title}}</h1>").unwrap();
        let output = stage.run(&store().view()).await.unwrap();

        assert_eq!(output.value, json!("<h1>Q3 &lt;draft&gt;</h1>"));
        assert!(output.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_render_raw_with_artifact() {
        let stage = RenderStage::new(
            "report",
            "report_md",
            "# {{title}}\n{{#each items}}- {{this}}\n{{/each}}",
        )
        .unwrap()
        .raw()
        .artifact("report.md", "text/markdown");

        let output = stage.run(&store().view()).await.unwrap();
        let expected = "# Q3 <draft>\n- a\n- b\n";
        assert_eq!(output.value, json!(expected));
        assert_eq!(output.artifacts.len(), 1);
        assert_eq!(output.artifacts[0].content, expected.as_bytes());
        assert_eq!(output.artifacts[0].content_type, "text/markdown");
    }

    #[test]
    fn test_invalid_template() {
        let result = RenderStage::new("report", "out", "{{#each items}}unclosed");
        assert!(matches!(result, Err(StagelineError::Template(_))));
    }

    #[tokio::test]
    async fn test_strict_mode_missing_field() {
        let stage = RenderStage::new("report", "out", "{{missing}}")
            .unwrap()
            .strict(true);
        let err = stage.run(&store().view()).await.unwrap_err();
        assert!(matches!(err, StagelineError::Template(_)));
    }
}
