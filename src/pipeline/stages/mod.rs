//! Reusable stage implementations
//!
//! These cover the glue most pipelines need around their domain-specific stages:
//! 1. FnStage - Synchronous closure over the state view
//! 2. ProjectStage - Shape earlier outputs into a new JSON object
//! 3. RenderStage - Render a Handlebars template, optionally as an artifact
//! 4. HttpFetchStage - GET a JSON document with timeout and retries

pub mod fetch;
pub mod fn_stage;
pub mod project;
pub mod render;

// Re-export stages
pub use fetch::{retry_with_backoff, AttemptError, HttpFetchStage, RetryPolicy};
pub use fn_stage::FnStage;
pub use project::ProjectStage;
pub use render::RenderStage;
