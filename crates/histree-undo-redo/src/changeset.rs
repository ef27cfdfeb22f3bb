//! Changesets: atomic groups of recorded changes

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::change::Change;
use crate::error::Result;
use crate::merge::merge_changes;

/// An ordered group of changes that is undone and redone as a unit
#[derive(Debug, Clone)]
pub struct Changeset<V> {
    id: Uuid,
    owner: Uuid,
    descriptor: String,
    created_at: DateTime<Utc>,
    changes: Vec<Change<V>>,
}

/// Serialisable description of a changeset, without its changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetSummary {
    /// Changeset id
    pub id: Uuid,
    /// Tracker that recorded the changeset
    pub owner: Uuid,
    /// Caller-supplied label
    pub descriptor: String,
    /// When the changeset was opened
    pub created_at: DateTime<Utc>,
    /// Number of recorded changes
    pub change_count: usize,
}

impl<V> Changeset<V> {
    /// Open an empty changeset for the tracker `owner`
    pub fn new(owner: Uuid, descriptor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            descriptor: descriptor.into(),
            created_at: Utc::now(),
            changes: Vec::new(),
        }
    }

    /// Unique id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Id of the tracker that created this changeset
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Caller-supplied label
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Recorded changes in capture order
    pub fn changes(&self) -> &[Change<V>] {
        &self.changes
    }

    /// Number of recorded changes
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Append a change
    pub fn push(&mut self, change: Change<V>) {
        self.changes.push(change);
    }

    /// Metadata summary
    pub fn summary(&self) -> ChangesetSummary {
        ChangesetSummary {
            id: self.id,
            owner: self.owner,
            descriptor: self.descriptor.clone(),
            created_at: self.created_at,
            change_count: self.changes.len(),
        }
    }
}

impl<V> Changeset<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    /// Revert every change, last to first.
    ///
    /// A failure part-way leaves the earlier reverts in place.
    pub fn undo(&self) -> Result<()> {
        debug!(id = %self.id, changes = self.changes.len(), "Undoing changeset");
        for change in self.changes.iter().rev() {
            change.undo()?;
        }
        Ok(())
    }

    /// Re-apply every change, first to last
    pub fn redo(&self) -> Result<()> {
        debug!(id = %self.id, changes = self.changes.len(), "Redoing changeset");
        for change in &self.changes {
            change.redo()?;
        }
        Ok(())
    }

    /// Compact the recorded changes in place. On error the changes are left
    /// as they were.
    pub fn merge(&mut self) -> Result<()> {
        self.changes = merge_changes(self.changes.clone())?;
        Ok(())
    }
}

impl<V> fmt::Display for Changeset<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] ({} changes, {})",
            self.descriptor,
            self.id,
            self.changes.len(),
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
