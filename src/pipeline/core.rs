use super::descriptor::StageDescriptor;
use super::run_state::RunState;
use crate::artifact::{ArtifactDescriptor, NewArtifact};
use crate::error::StagelineResult;
use crate::state::{StateSnapshot, StateView};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// A single stage in a pipeline
///
/// A stage reads the run's state through a [`StateView`] and returns its
/// output; it never writes state or artifacts itself. The runner writes the
/// returned value under the descriptor's `output_key` and persists the
/// returned artifacts, so a stage that fails leaves nothing behind.
///
/// Retries, timeouts and any background concurrency belong inside `run`.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use serde_json::json;
/// use stageline::error::StagelineResult;
/// use stageline::pipeline::{Stage, StageDescriptor, StageOutput};
/// use stageline::state::StateView;
///
/// struct Shout {
///     descriptor: StageDescriptor,
/// }
///
/// #[async_trait]
/// impl Stage for Shout {
///     fn descriptor(&self) -> &StageDescriptor {
///         &self.descriptor
///     }
///
///     async fn run(&self, state: &StateView) -> StagelineResult<StageOutput> {
///         let input = state.get_string("input")?;
///         Ok(StageOutput::new(json!(input.to_uppercase())))
///     }
/// }
/// ```
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name, required inputs and output key
    fn descriptor(&self) -> &StageDescriptor;

    /// Execute the stage body
    async fn run(&self, state: &StateView) -> StagelineResult<StageOutput>;

    /// Get stage name for logging and progress tracking
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Estimated duration for progress display, if known
    fn estimated_duration(&self) -> Option<Duration> {
        None
    }
}

/// Value and artifacts returned by a stage body (or substituted by a pre-hook)
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub value: Value,

    /// Persisted in order before the output key is written. If one fails,
    /// the stage fails with the output key unwritten, but versions already
    /// stored for earlier artifacts stay in the sink (it is append-only).
    pub artifacts: Vec<NewArtifact>,
}

impl StageOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: NewArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// What a stage produced once the runner applied it; handed to post-hooks
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage_name: String,
    pub output_key: String,
    pub value: Value,
    pub artifacts: Vec<ArtifactDescriptor>,

    /// Name of the pre-hook that replaced the body, if any
    pub short_circuited_by: Option<String>,
}

/// Terminal status of one stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    ShortCircuited,
    Failed,
}

/// Result of a pipeline stage execution
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage_name: String,
    pub status: StageStatus,
    pub output_key: String,
    pub artifacts: Vec<ArtifactDescriptor>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl StageRecord {
    /// Record for a stage whose output was applied
    pub fn applied(outcome: &StageOutcome, duration: Duration) -> Self {
        Self {
            stage_name: outcome.stage_name.clone(),
            status: if outcome.short_circuited_by.is_some() {
                StageStatus::ShortCircuited
            } else {
                StageStatus::Completed
            },
            output_key: outcome.output_key.clone(),
            artifacts: outcome.artifacts.clone(),
            duration,
            error: None,
        }
    }

    /// Record for a failed stage
    pub fn failed(
        descriptor: &StageDescriptor,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            stage_name: descriptor.name.clone(),
            status: StageStatus::Failed,
            output_key: descriptor.output_key.clone(),
            artifacts: Vec::new(),
            duration,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status != StageStatus::Failed
    }
}

/// Result of a completed pipeline run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: RunState,
    pub stage_records: Vec<StageRecord>,
    pub total_duration: Duration,

    /// Advisory hook failures that were logged and skipped
    pub warnings: Vec<String>,

    /// Final state
    pub snapshot: StateSnapshot,
}

impl RunReport {
    /// Stages whose body ran and succeeded
    pub fn executed_stages(&self) -> usize {
        self.stage_records
            .iter()
            .filter(|r| r.status == StageStatus::Completed)
            .count()
    }

    /// Stages whose body was replaced by a pre-hook result
    pub fn short_circuited_stages(&self) -> usize {
        self.stage_records
            .iter()
            .filter(|r| r.status == StageStatus::ShortCircuited)
            .count()
    }

    /// Every artifact version written by stages during the run
    pub fn artifacts(&self) -> Vec<&ArtifactDescriptor> {
        self.stage_records
            .iter()
            .flat_map(|r| r.artifacts.iter())
            .collect()
    }

    pub fn record(&self, stage_name: &str) -> Option<&StageRecord> {
        self.stage_records.iter().find(|r| r.stage_name == stage_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn outcome(name: &str, short_circuited_by: Option<&str>) -> StageOutcome {
        StageOutcome {
            stage_name: name.to_string(),
            output_key: format!("{}_out", name),
            value: json!(null),
            artifacts: Vec::new(),
            short_circuited_by: short_circuited_by.map(str::to_string),
        }
    }

    #[test]
    fn test_stage_output_builder() {
        let output = StageOutput::new(json!("<p>hi</p>"))
            .with_artifact(NewArtifact::text("report.html", "<p>hi</p>", "text/html"));
        assert_eq!(output.artifacts.len(), 1);
        assert_eq!(output.artifacts[0].name, "report.html");
    }

    #[test]
    fn test_stage_record_applied() {
        let record = StageRecord::applied(&outcome("fetch", None), Duration::from_millis(5));
        assert_eq!(record.status, StageStatus::Completed);
        assert!(record.succeeded());

        let cached = StageRecord::applied(&outcome("fetch", Some("cache")), Duration::ZERO);
        assert_eq!(cached.status, StageStatus::ShortCircuited);
    }

    #[test]
    fn test_stage_record_failed() {
        let descriptor = StageDescriptor::new("analyze", "summary");
        let record = StageRecord::failed(&descriptor, "timeout", Duration::from_secs(1));
        assert!(!record.succeeded());
        assert_eq!(record.error.as_deref(), Some("timeout"));
        assert_eq!(record.output_key, "summary");
    }

    #[test]
    fn test_run_report_counts() {
        let report = RunReport {
            run_id: Uuid::new_v4(),
            pipeline_name: "p".to_string(),
            status: RunState::Completed,
            stage_records: vec![
                StageRecord::applied(&outcome("a", None), Duration::ZERO),
                StageRecord::applied(&outcome("b", Some("cache")), Duration::ZERO),
                StageRecord::applied(&outcome("c", None), Duration::ZERO),
            ],
            total_duration: Duration::ZERO,
            warnings: Vec::new(),
            snapshot: StateSnapshot {
                entries: Default::default(),
                progress: Default::default(),
                taken_at: Utc::now(),
            },
        };

        assert_eq!(report.executed_stages(), 2);
        assert_eq!(report.short_circuited_stages(), 1);
        assert!(report.record("b").is_some());
        assert!(report.record("z").is_none());
    }
}
