//! Lifecycle of a single pipeline run
//!
//! ```text
//! Pending ──start(0)──▶ Running(0) ──start(1)──▶ ... ──▶ Running(N-1) ──complete──▶ Completed
//!    │                      │                               │
//!    └──fail────────────────┴───────────────fail────────────┴──────────────────▶ Failed
//! ```
//!
//! Transitions consume the current state and return the next one, or an
//! `InvalidStateTransition` error naming the attempted move.

use crate::error::{StagelineError, StagelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RunState {
    /// Created, inputs not yet validated
    Pending,

    /// Executing the stage at `stage_index`
    #[serde(rename_all = "camelCase")]
    Running { stage_index: usize, stage: String },

    /// Every stage succeeded
    Completed,

    /// Halted; `stage` is `None` when validation failed before any stage ran
    Failed {
        stage: Option<String>,
        error: String,
    },
}

impl RunState {
    /// Get the current state as a string
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running { .. } => "Running",
            Self::Completed => "Completed",
            Self::Failed { .. } => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// Stage currently executing, if any
    pub fn current_stage(&self) -> Option<&str> {
        match self {
            Self::Running { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Transition to Running for stage `index`
    ///
    /// Stage 0 starts from Pending; stage K starts only from Running(K-1).
    pub fn start_stage(self, index: usize, stage: impl Into<String>) -> StagelineResult<Self> {
        let allowed = match &self {
            Self::Pending => index == 0,
            Self::Running { stage_index, .. } => index == stage_index + 1,
            _ => false,
        };

        if allowed {
            Ok(Self::Running {
                stage_index: index,
                stage: stage.into(),
            })
        } else {
            Err(StagelineError::InvalidStateTransition(format!(
                "Cannot start stage {} from {} state",
                index,
                self.state_name()
            )))
        }
    }

    /// Transition to Completed (only from Running on the last stage)
    pub fn complete(self, total_stages: usize) -> StagelineResult<Self> {
        match self {
            Self::Running { stage_index, .. } if stage_index + 1 == total_stages => {
                Ok(Self::Completed)
            }
            _ => Err(StagelineError::InvalidStateTransition(format!(
                "Cannot complete from {} state",
                self.state_name()
            ))),
        }
    }

    /// Transition to Failed (from Pending or Running)
    pub fn fail(self, error: impl Into<String>) -> StagelineResult<Self> {
        match self {
            Self::Pending => Ok(Self::Failed {
                stage: None,
                error: error.into(),
            }),
            Self::Running { stage, .. } => Ok(Self::Failed {
                stage: Some(stage),
                error: error.into(),
            }),
            _ => Err(StagelineError::InvalidStateTransition(format!(
                "Cannot fail from {} state",
                self.state_name()
            ))),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::Pending
    }
}

/// A recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    current: RunState,
    history: Vec<Transition>,
    claimed: bool,
}

/// Shared, pollable handle to a run's state
///
/// The runner applies transitions; observers clone the tracker and read
/// `current()` or `history()` at any time.
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    inner: Arc<RwLock<TrackerInner>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> StagelineResult<RunState> {
        Ok(self.inner.read()?.current.clone())
    }

    /// Every state entered after Pending, oldest first
    pub fn history(&self) -> StagelineResult<Vec<Transition>> {
        Ok(self.inner.read()?.history.clone())
    }

    /// Reserve a Pending run for a single executor
    ///
    /// Only the first caller succeeds; later callers get
    /// `InvalidStateTransition` even while the run is still Pending.
    pub fn claim(&self) -> StagelineResult<()> {
        let mut inner = self.inner.write()?;
        if inner.claimed || inner.current != RunState::Pending {
            let suffix = if inner.current == RunState::Pending {
                " (already executing)"
            } else {
                ""
            };
            return Err(StagelineError::InvalidStateTransition(format!(
                "Cannot execute from {} state{}",
                inner.current.state_name(),
                suffix
            )));
        }
        inner.claimed = true;
        Ok(())
    }

    /// Apply a transition atomically; the state is unchanged if it is rejected
    pub fn apply<F>(&self, transition: F) -> StagelineResult<RunState>
    where
        F: FnOnce(RunState) -> StagelineResult<RunState>,
    {
        let mut inner = self.inner.write()?;
        let next = transition(inner.current.clone())?;
        inner.current = next.clone();
        inner.history.push(Transition {
            state: next.clone(),
            at: Utc::now(),
        });
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let state = RunState::Pending
            .start_stage(0, "fetch")
            .unwrap()
            .start_stage(1, "analyze")
            .unwrap();
        assert_eq!(state.current_stage(), Some("analyze"));

        let state = state.complete(2).unwrap();
        assert_eq!(state, RunState::Completed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_cannot_skip_stage() {
        let result = RunState::Pending.start_stage(1, "analyze");
        assert!(matches!(
            result,
            Err(StagelineError::InvalidStateTransition(msg)) if msg.contains("Pending")
        ));
    }

    #[test]
    fn test_cannot_complete_early() {
        let state = RunState::Pending.start_stage(0, "fetch").unwrap();
        assert!(state.complete(3).is_err());
        assert!(RunState::Pending.complete(0).is_err());
    }

    #[test]
    fn test_fail_from_pending_has_no_stage() {
        let state = RunState::Pending.fail("missing inputs").unwrap();
        assert_eq!(
            state,
            RunState::Failed {
                stage: None,
                error: "missing inputs".to_string()
            }
        );
    }

    #[test]
    fn test_fail_from_running_names_stage() {
        let state = RunState::Pending
            .start_stage(0, "fetch")
            .unwrap()
            .fail("timeout")
            .unwrap();
        assert!(matches!(state, RunState::Failed { stage: Some(ref s), .. } if s == "fetch"));
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(RunState::Completed.fail("late").is_err());
        assert!(RunState::Completed.start_stage(0, "fetch").is_err());

        let failed = RunState::Pending.fail("x").unwrap();
        assert!(failed.clone().start_stage(0, "fetch").is_err());
        assert!(failed.fail("again").is_err());
    }

    #[test]
    fn test_tracker_records_history() {
        let tracker = RunTracker::new();
        let observer = tracker.clone();

        tracker.apply(|s| s.start_stage(0, "fetch")).unwrap();
        tracker.apply(|s| s.complete(1)).unwrap();

        assert_eq!(observer.current().unwrap(), RunState::Completed);
        let history = observer.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].state.current_stage(), Some("fetch"));
    }

    #[test]
    fn test_tracker_rejected_transition_keeps_state() {
        let tracker = RunTracker::new();
        assert!(tracker.apply(|s| s.complete(1)).is_err());
        assert_eq!(tracker.current().unwrap(), RunState::Pending);
        assert!(tracker.history().unwrap().is_empty());
    }

    #[test]
    fn test_tracker_claim_is_exclusive() {
        let tracker = RunTracker::new();
        let other = tracker.clone();

        tracker.claim().unwrap();
        let err = other.claim().unwrap_err();
        assert!(matches!(
            err,
            StagelineError::InvalidStateTransition(msg) if msg.contains("already executing")
        ));
        assert_eq!(tracker.current().unwrap(), RunState::Pending);
    }

    #[test]
    fn test_tracker_claim_rejects_finished_run() {
        let tracker = RunTracker::new();
        tracker.apply(|s| s.fail("boom")).unwrap();
        assert!(tracker.claim().is_err());
    }

    #[test]
    fn test_serialization() {
        let state = RunState::Running {
            stage_index: 2,
            stage: "report".to_string(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["stageIndex"], 2);
    }
}
