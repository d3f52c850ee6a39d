//! Run-scoped shared state
//!
//! A [`StateStore`] holds the key/value entries every stage of one pipeline run
//! can see. Keys are single-writer: once a key has been written (by the caller's
//! initial inputs, a stage, or a hook) any further write to it fails with
//! [`StagelineError::KeyConflict`](crate::error::StagelineError::KeyConflict).
//!
//! Progress metadata (current stage, completed stages) is kept beside the
//! entries in a [`RunProgress`] record so hooks can update it repeatedly without
//! violating the single-writer rule.
//!
//! # Example
//! ```
//! use stageline::state::StateStore;
//! use serde_json::json;
//!
//! let store = StateStore::new();
//! store.set("id", json!("loc-1"), "input").unwrap();
//!
//! let view = store.view();
//! assert_eq!(view.get_string("id").unwrap(), "loc-1");
//! assert!(store.set("id", json!("loc-2"), "fetch").is_err());
//! ```

pub mod snapshot;
pub mod store;
pub mod view;

pub use snapshot::{RunProgress, StateSnapshot};
pub use store::{StateStore, INPUT_WRITER};
pub use view::StateView;
