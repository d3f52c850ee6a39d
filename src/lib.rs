//! Sequential stage pipelines over a shared, single-writer state store
//!
//! - [`state`]: per-run key/value store; every key is written at most once
//! - [`artifact`]: append-only, versioned artifact sink shared across runs
//! - [`pipeline`]: stages, lifecycle hooks and the runner state machine
//! - [`repository`]: artifact persistence backends (memory, filesystem)
//! - [`events`]: lifecycle events for observers
//!
//! # Example
//! ```no_run
//! use serde_json::json;
//! use stageline::pipeline::stages::{FnStage, RenderStage};
//! use stageline::pipeline::{Pipeline, StageDescriptor, StageOutput};
//!
//! # async fn demo() -> stageline::StagelineResult<()> {
//! let pipeline = Pipeline::builder("location-report")
//!     .add_stage(FnStage::new(
//!         StageDescriptor::new("analyze", "summary").requires(["target_location"]),
//!         |state| Ok(StageOutput::new(json!({ "city": state.get_string("target_location")? }))),
//!     ))
//!     .add_stage(
//!         RenderStage::new("report", "report_html", "<h1>{{summary.city}}</h1>")?
//!             .requires(["summary"])
//!             .artifact("report.html", "text/html"),
//!     )
//!     .build()?;
//!
//! let sink = pipeline.open_sink();
//! pipeline.run([("target_location", json!("Lisbon"))], &sink).await?;
//! assert_eq!(sink.get_latest("report.html")?.as_text(), Some("<h1>Lisbon</h1>"));
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod events;
pub mod hash;
pub mod logger;
pub mod pipeline;
pub mod repository;
pub mod state;

pub use artifact::{ArtifactDescriptor, ArtifactSink, NewArtifact, StoredArtifact};
pub use config::{ArtifactBackendConfig, RunnerConfig};
pub use error::{StagelineError, StagelineResult};
pub use pipeline::{Pipeline, PipelineRun, RunReport, RunState, Stage, StageDescriptor, StageOutput};
pub use state::{StateSnapshot, StateStore, StateView};
