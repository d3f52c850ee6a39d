//! Versioned artifacts produced during pipeline runs
//!
//! Stages and hooks hand [`NewArtifact`]s to the [`ArtifactSink`], which assigns
//! per-name version numbers (1, 2, 3, ...) and delegates durable storage to an
//! [`ArtifactRepository`](crate::repository::ArtifactRepository). A stored
//! `(name, version)` pair is never rewritten.

pub mod sink;
pub mod types;

pub use sink::ArtifactSink;
pub use types::{ArtifactDescriptor, NewArtifact, StoredArtifact};
