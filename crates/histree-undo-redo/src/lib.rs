#![warn(missing_docs)]

//! Change tracking and undo/redo for in-memory object graphs
//!
//! Records field assignments and container mutations into changesets,
//! compacts them, and replays them backwards and forwards along either a
//! single timeline ([`LinearHistory`]) or a branching [`VersionTree`].
//!
//! ```
//! use std::sync::Arc;
//! use histree_undo_redo::{ChangeTracker, FieldTable, TrackedObject, TrackerConfig};
//!
//! #[derive(Clone)]
//! struct Point { x: i64 }
//!
//! let table = Arc::new(FieldTable::new().field("x", |p: &Point| p.x, |p: &mut Point, v| p.x = v));
//! let point = TrackedObject::shared(Point { x: 0 }, table);
//! let x = point.field("x").unwrap();
//!
//! let tracker: ChangeTracker<i64> = ChangeTracker::new(TrackerConfig::default());
//! tracker.start_changeset("move");
//! tracker.set_field(&point, x, 4).unwrap();
//! tracker.commit(false, false).unwrap();
//!
//! tracker.undo().unwrap();
//! assert_eq!(point.read(|p| p.x), 0);
//! ```

pub mod change;
pub mod changeset;
pub mod config;
pub mod error;
pub mod field;
pub mod history;
pub mod merge;
pub mod models;
pub mod target;
pub mod tracker;
pub mod tree;

#[cfg(test)]
mod test_support;

// Re-export public API
pub use change::{Change, CollectionAction, ContainerEvent, FieldChange, SequenceDelta, SetDelta};
pub use changeset::{Changeset, ChangesetSummary};
pub use config::TrackerConfig;
pub use error::{Result, UndoRedoError};
pub use field::{FieldId, FieldOwner, FieldTable, TrackedObject};
pub use history::{History, HistoryEntry, HistoryEvent, HistoryListener, LinearHistory};
pub use merge::merge_changes;
pub use models::ChangeValidator;
pub use target::{SequenceTarget, SetTarget};
pub use tracker::{ChangeTracker, FieldCaptureGuard, TrackedValue};
pub use tree::{BranchInfo, NodeId, VersionTree};
