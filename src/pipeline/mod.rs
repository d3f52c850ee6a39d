//! Pipeline runner for sequential, stateful stage execution
//!
//! A pipeline is an ordered list of stages. Each stage declares the state keys
//! it requires and the single key it produces; the runner validates the
//! requirements up front, executes stages one at a time, writes each output
//! exactly once, and hands produced artifacts to the artifact sink.
//! Lifecycle hooks run around every stage for progress tracking, artifact
//! persistence and short-circuiting (e.g. serving a cached result).
//!
//! # Example
//! ```no_run
//! use async_trait::async_trait;
//! use serde_json::json;
//! use stageline::artifact::ArtifactSink;
//! use stageline::error::StagelineResult;
//! use stageline::pipeline::{Pipeline, Stage, StageDescriptor, StageOutput};
//! use stageline::state::StateView;
//!
//! // Define a custom stage
//! struct Upper {
//!     descriptor: StageDescriptor,
//! }
//!
//! #[async_trait]
//! impl Stage for Upper {
//!     fn descriptor(&self) -> &StageDescriptor {
//!         &self.descriptor
//!     }
//!
//!     async fn run(&self, state: &StateView) -> StagelineResult<StageOutput> {
//!         let input = state.get_string("input")?;
//!         Ok(StageOutput::new(json!(input.to_uppercase())))
//!     }
//! }
//!
//! # async fn demo() -> StagelineResult<()> {
//! // Build and execute pipeline
//! let pipeline = Pipeline::builder("my-pipeline")
//!     .add_stage(Upper {
//!         descriptor: StageDescriptor::new("upper", "output").requires(["input"]),
//!     })
//!     .build()?;
//!
//! let sink = ArtifactSink::in_memory();
//! let report = pipeline.run([("input", json!("hello"))], &sink).await?;
//! assert_eq!(report.snapshot.get("output"), Some(&json!("HELLO")));
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod descriptor;
pub mod executor;
pub mod hooks;
pub mod run_state;
pub mod stages;

// Re-export main types
pub use self::core::{RunReport, Stage, StageOutcome, StageOutput, StageRecord, StageStatus};
pub use descriptor::StageDescriptor;
pub use executor::{Pipeline, PipelineBuilder, PipelineRun};
pub use hooks::{HookAction, HookContext, PersistArtifactHook, ProgressHook, StageHook};
pub use run_state::{RunState, RunTracker, Transition};
