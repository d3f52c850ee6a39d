use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event names - centralized for consistency
pub mod event_names {
    pub const PIPELINE_STARTED: &str = "pipeline:started";
    pub const PIPELINE_STAGE_STARTED: &str = "pipeline:stage-started";
    pub const PIPELINE_STAGE_COMPLETED: &str = "pipeline:stage-completed";
    pub const PIPELINE_STAGE_SHORT_CIRCUITED: &str = "pipeline:stage-short-circuited";
    pub const PIPELINE_HOOK_FAILED: &str = "pipeline:hook-failed";
    pub const PIPELINE_COMPLETED: &str = "pipeline:completed";
    pub const PIPELINE_FAILED: &str = "pipeline:failed";
}

/// Pipeline started event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStartedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub total_stages: usize,
    pub timestamp: String,
}

/// Stage started event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStartedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub stage_index: usize,
    pub total_stages: usize,
    pub timestamp: String,
}

/// Stage completed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCompletedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub stage_index: usize,
    pub total_stages: usize,
    pub output_key: String,
    /// "name@version" of each artifact the stage produced
    pub artifacts: Vec<String>,
    pub duration_ms: u64,
    pub timestamp: String,
}

/// Stage body replaced by a pre-hook result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageShortCircuitedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub hook_name: String,
    pub timestamp: String,
}

/// Hook failure event (advisory or fatal)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookFailedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub hook_name: String,
    pub advisory: bool,
    pub error: String,
    pub timestamp: String,
}

/// Pipeline completed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCompletedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub total_duration_ms: u64,
    pub stages_completed: usize,
    pub stages_short_circuited: usize,
    pub timestamp: String,
}

/// Pipeline failed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineFailedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    /// `None` when the run failed before any stage started
    pub failed_stage: Option<String>,
    pub error: String,
    pub timestamp: String,
}

/// Any lifecycle event published by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum PipelineEvent {
    PipelineStarted(PipelineStartedEvent),
    StageStarted(StageStartedEvent),
    StageCompleted(StageCompletedEvent),
    StageShortCircuited(StageShortCircuitedEvent),
    HookFailed(HookFailedEvent),
    PipelineCompleted(PipelineCompletedEvent),
    PipelineFailed(PipelineFailedEvent),
}

impl PipelineEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::PipelineStarted(_) => event_names::PIPELINE_STARTED,
            Self::StageStarted(_) => event_names::PIPELINE_STAGE_STARTED,
            Self::StageCompleted(_) => event_names::PIPELINE_STAGE_COMPLETED,
            Self::StageShortCircuited(_) => event_names::PIPELINE_STAGE_SHORT_CIRCUITED,
            Self::HookFailed(_) => event_names::PIPELINE_HOOK_FAILED,
            Self::PipelineCompleted(_) => event_names::PIPELINE_COMPLETED,
            Self::PipelineFailed(_) => event_names::PIPELINE_FAILED,
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            Self::PipelineStarted(e) => e.run_id,
            Self::StageStarted(e) => e.run_id,
            Self::StageCompleted(e) => e.run_id,
            Self::StageShortCircuited(e) => e.run_id,
            Self::HookFailed(e) => e.run_id,
            Self::PipelineCompleted(e) => e.run_id,
            Self::PipelineFailed(e) => e.run_id,
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Publishes lifecycle events to any number of subscribers
///
/// Publishing never blocks and never fails the run: with no subscribers the
/// event is dropped, and slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Emit pipeline started event
    pub fn pipeline_started(&self, run_id: Uuid, pipeline_name: &str, total_stages: usize) {
        self.emit(PipelineEvent::PipelineStarted(PipelineStartedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            total_stages,
            timestamp: now(),
        }));
    }

    /// Emit stage started event
    pub fn stage_started(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        stage_name: &str,
        stage_index: usize,
        total_stages: usize,
    ) {
        self.emit(PipelineEvent::StageStarted(StageStartedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            stage_name: stage_name.to_string(),
            stage_index,
            total_stages,
            timestamp: now(),
        }));
    }

    /// Emit stage completed event
    #[allow(clippy::too_many_arguments)]
    pub fn stage_completed(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        stage_name: &str,
        stage_index: usize,
        total_stages: usize,
        output_key: &str,
        artifacts: Vec<String>,
        duration_ms: u64,
    ) {
        self.emit(PipelineEvent::StageCompleted(StageCompletedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            stage_name: stage_name.to_string(),
            stage_index,
            total_stages,
            output_key: output_key.to_string(),
            artifacts,
            duration_ms,
            timestamp: now(),
        }));
    }

    /// Emit stage short-circuited event
    pub fn stage_short_circuited(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        stage_name: &str,
        hook_name: &str,
    ) {
        self.emit(PipelineEvent::StageShortCircuited(StageShortCircuitedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            stage_name: stage_name.to_string(),
            hook_name: hook_name.to_string(),
            timestamp: now(),
        }));
    }

    /// Emit hook failed event
    pub fn hook_failed(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        stage_name: &str,
        hook_name: &str,
        advisory: bool,
        error: &str,
    ) {
        self.emit(PipelineEvent::HookFailed(HookFailedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            stage_name: stage_name.to_string(),
            hook_name: hook_name.to_string(),
            advisory,
            error: error.to_string(),
            timestamp: now(),
        }));
    }

    /// Emit pipeline completed event
    pub fn pipeline_completed(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        total_duration_ms: u64,
        stages_completed: usize,
        stages_short_circuited: usize,
    ) {
        self.emit(PipelineEvent::PipelineCompleted(PipelineCompletedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            total_duration_ms,
            stages_completed,
            stages_short_circuited,
            timestamp: now(),
        }));
    }

    /// Emit pipeline failed event
    pub fn pipeline_failed(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        failed_stage: Option<&str>,
        error: &str,
    ) {
        self.emit(PipelineEvent::PipelineFailed(PipelineFailedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            failed_stage: failed_stage.map(str::to_string),
            error: error.to_string(),
            timestamp: now(),
        }));
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
