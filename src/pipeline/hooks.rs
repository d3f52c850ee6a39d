use super::core::{StageOutcome, StageOutput};
use super::descriptor::StageDescriptor;
use crate::artifact::{ArtifactDescriptor, ArtifactSink, NewArtifact};
use crate::error::StagelineResult;
use crate::logger::{LogLevel, LOGGER};
use crate::state::StateStore;
use serde_json::Value;
use uuid::Uuid;

/// What a pre-hook tells the runner to do with the stage body
#[derive(Debug, Clone, PartialEq)]
pub enum HookAction {
    /// Run the body as usual
    Continue,

    /// Skip the body and use this output as the stage's result
    ShortCircuit(StageOutput),
}

/// Everything a hook may observe or touch for one stage invocation
pub struct HookContext<'a> {
    pub run_id: Uuid,
    pub pipeline_name: &'a str,
    pub stage: &'a StageDescriptor,
    pub stage_index: usize,
    pub total_stages: usize,
    pub(crate) state: &'a StateStore,
    pub(crate) artifacts: &'a ArtifactSink,
}

impl<'a> HookContext<'a> {
    /// Full read/write access to the run's state
    pub fn state(&self) -> &StateStore {
        self.state
    }

    pub fn artifacts(&self) -> &ArtifactSink {
        self.artifacts
    }

    /// Write a side-channel key, recorded as written by `<stage>:<hook>`
    pub fn write(&self, hook_name: &str, key: impl Into<String>, value: Value) -> StagelineResult<()> {
        let writer = format!("{}:{}", self.stage.name, hook_name);
        self.state.set(key, value, &writer)
    }

    /// Persist an artifact through the run's sink
    pub fn put_artifact(&self, artifact: NewArtifact) -> StagelineResult<ArtifactDescriptor> {
        self.artifacts.put_artifact(artifact)
    }
}

/// Callback attached around a stage
///
/// Pre-hooks (`before_stage`) run in attachment order with global hooks first;
/// post-hooks (`after_stage`) run in reverse, so global hooks see the stage
/// last. Post-hooks only run after the stage's output has been applied.
///
/// A failing hook aborts the run unless [`advisory`](StageHook::advisory)
/// returns `true`, in which case the failure is logged and recorded as a
/// warning on the run.
pub trait StageHook: Send + Sync {
    fn name(&self) -> &str;

    fn advisory(&self) -> bool {
        false
    }

    fn before_stage(&self, _ctx: &HookContext<'_>) -> StagelineResult<HookAction> {
        Ok(HookAction::Continue)
    }

    fn after_stage(&self, _ctx: &HookContext<'_>, _outcome: &StageOutcome) -> StagelineResult<()> {
        Ok(())
    }
}

/// Tracks `current_stage` and `completed_stages` in the run's progress record
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressHook;

impl ProgressHook {
    pub const NAME: &'static str = "progress";

    pub fn new() -> Self {
        Self
    }
}

impl StageHook for ProgressHook {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn before_stage(&self, ctx: &HookContext<'_>) -> StagelineResult<HookAction> {
        ctx.state.set_current_stage(Some(&ctx.stage.name))?;
        Ok(HookAction::Continue)
    }

    fn after_stage(&self, ctx: &HookContext<'_>, _outcome: &StageOutcome) -> StagelineResult<()> {
        ctx.state.complete_stage(&ctx.stage.name)
    }
}

/// Saves a state value as a named artifact once the stage has run
///
/// String values are stored as their UTF-8 bytes; anything else is stored as
/// pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct PersistArtifactHook {
    hook_name: String,
    state_key: String,
    artifact_name: String,
    content_type: String,
    advisory: bool,
}

impl PersistArtifactHook {
    pub fn new(
        state_key: impl Into<String>,
        artifact_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        let artifact_name = artifact_name.into();
        Self {
            hook_name: format!("persist:{}", artifact_name),
            state_key: state_key.into(),
            artifact_name,
            content_type: content_type.into(),
            advisory: true,
        }
    }

    /// `false` aborts the run on failure instead of logging and continuing
    pub fn with_advisory(mut self, advisory: bool) -> Self {
        self.advisory = advisory;
        self
    }

    fn encode(value: &Value) -> StagelineResult<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Ok(serde_json::to_vec_pretty(other)?),
        }
    }
}

impl StageHook for PersistArtifactHook {
    fn name(&self) -> &str {
        &self.hook_name
    }

    fn advisory(&self) -> bool {
        self.advisory
    }

    fn after_stage(&self, ctx: &HookContext<'_>, _outcome: &StageOutcome) -> StagelineResult<()> {
        let value = ctx.state.get(&self.state_key)?;
        let content = Self::encode(&value)?;
        let version = ctx.artifacts.put(&self.artifact_name, content, &self.content_type)?;

        LOGGER.log(
            LogLevel::Debug,
            &format!(
                "Persisted '{}' as {} v{} after stage '{}' (run: {})",
                self.state_key, self.artifact_name, version, ctx.stage.name, ctx.run_id
            ),
            "pipeline::hooks",
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome(descriptor: &StageDescriptor) -> StageOutcome {
        StageOutcome {
            stage_name: descriptor.name.clone(),
            output_key: descriptor.output_key.clone(),
            value: json!(null),
            artifacts: Vec::new(),
            short_circuited_by: None,
        }
    }

    fn context<'a>(
        descriptor: &'a StageDescriptor,
        state: &'a StateStore,
        sink: &'a ArtifactSink,
    ) -> HookContext<'a> {
        HookContext {
            run_id: Uuid::new_v4(),
            pipeline_name: "test",
            stage: descriptor,
            stage_index: 0,
            total_stages: 1,
            state,
            artifacts: sink,
        }
    }

    #[test]
    fn test_progress_hook() {
        let descriptor = StageDescriptor::new("fetch", "raw");
        let state = StateStore::new();
        let sink = ArtifactSink::in_memory();
        let ctx = context(&descriptor, &state, &sink);
        let hook = ProgressHook::new();

        assert_eq!(hook.before_stage(&ctx).unwrap(), HookAction::Continue);
        assert_eq!(state.progress().unwrap().current_stage.as_deref(), Some("fetch"));

        hook.after_stage(&ctx, &outcome(&descriptor)).unwrap();
        let progress = state.progress().unwrap();
        assert_eq!(progress.completed_stages, vec!["fetch"]);
        assert!(progress.current_stage.is_none());
    }

    #[test]
    fn test_persist_string_as_utf8() {
        let descriptor = StageDescriptor::new("report", "report_html");
        let state = StateStore::new();
        state.set("report_html", json!("<h1>ok</h1>"), "report").unwrap();
        let sink = ArtifactSink::in_memory();
        let ctx = context(&descriptor, &state, &sink);

        let hook = PersistArtifactHook::new("report_html", "report.html", "text/html");
        assert!(hook.advisory());
        hook.after_stage(&ctx, &outcome(&descriptor)).unwrap();

        let stored = sink.get("report.html", None).unwrap();
        assert_eq!(stored.content, b"<h1>ok</h1>");
        assert_eq!(stored.descriptor.content_type, "text/html");
    }

    #[test]
    fn test_persist_json_value() {
        let descriptor = StageDescriptor::new("analyze", "summary");
        let state = StateStore::new();
        state.set("summary", json!({"score": 7}), "analyze").unwrap();
        let sink = ArtifactSink::in_memory();
        let ctx = context(&descriptor, &state, &sink);

        PersistArtifactHook::new("summary", "summary.json", "application/json")
            .after_stage(&ctx, &outcome(&descriptor))
            .unwrap();

        let stored = sink.get_latest("summary.json").unwrap();
        let parsed: Value = serde_json::from_slice(&stored.content).unwrap();
        assert_eq!(parsed, json!({"score": 7}));
    }

    #[test]
    fn test_persist_missing_key_fails() {
        let descriptor = StageDescriptor::new("report", "report_html");
        let state = StateStore::new();
        let sink = ArtifactSink::in_memory();
        let ctx = context(&descriptor, &state, &sink);

        let hook = PersistArtifactHook::new("nope", "nope.txt", "text/plain").with_advisory(false);
        assert!(!hook.advisory());
        assert!(hook.after_stage(&ctx, &outcome(&descriptor)).is_err());
    }

    #[test]
    fn test_context_write_records_hook_writer() {
        let descriptor = StageDescriptor::new("fetch", "raw");
        let state = StateStore::new();
        let sink = ArtifactSink::in_memory();
        let ctx = context(&descriptor, &state, &sink);

        ctx.write("audit", "fetch_audit", json!(true)).unwrap();
        assert_eq!(state.writer_of("fetch_audit").as_deref(), Some("fetch:audit"));
    }
}
