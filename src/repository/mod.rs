//! Repository Pattern Implementation
//!
//! This module provides the abstract interface for artifact persistence,
//! allowing easy swapping of storage backends (memory, file system, object
//! storage, ...).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         ArtifactRepository              │
//! │  (Abstract interface for persistence)   │
//! └──────────────┬──────────────────────────┘
//!                │
//!        ┌───────┴────────┬─────────────────┐
//!        │                │                 │
//! ┌──────▼──────┐  ┌──────▼──────┐  ┌───────▼───────┐
//! │InMemoryRepo │  │FileRepo     │  │ObjectStoreRepo│
//! │             │  │             │  │(future)       │
//! │- Tests      │  │- v<N>.bin   │  │- GCS / S3     │
//! │- Fast       │  │- v<N>.json  │  │               │
//! └─────────────┘  └─────────────┘  └───────────────┘
//! ```

pub mod factory;
pub mod file;
pub mod memory;
pub mod traits;

// Re-export main types
pub use factory::RepositoryFactory;
pub use file::FileArtifactRepository;
pub use memory::InMemoryArtifactRepository;
pub use traits::ArtifactRepository;
