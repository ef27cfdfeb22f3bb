//! History management and navigation

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::changeset::{Changeset, ChangesetSummary};
use crate::error::{Result, UndoRedoError};

/// A store of committed changesets that can replay them backwards and forwards.
///
/// `record` takes a changeset whose changes are already applied; `undo` and
/// `redo` replay against the tracked objects.
pub trait History<V> {
    /// Record a committed changeset as the new current state
    fn record(&mut self, changeset: Changeset<V>) -> Result<()>;

    /// Revert the most recent changeset
    fn undo(&mut self) -> Result<()>;

    /// Re-apply the next changeset
    fn redo(&mut self) -> Result<()>;

    /// Check if undo is available
    fn can_undo(&self) -> bool;

    /// Check if redo is available
    fn can_redo(&self) -> bool;

    /// Forget all history without touching tracked state
    fn reinitialize(&mut self);
}

/// Represents a single entry in the change history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The changeset associated with this entry
    pub changeset: ChangesetSummary,
    /// Position in the history
    pub index: usize,
    /// Whether this changeset is currently undone
    pub is_undone: bool,
}

/// Notification raised by a [`LinearHistory`] when its timeline changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEvent {
    /// The number of applied changesets changed
    IndexChanged {
        /// New current index
        index: usize,
    },
    /// Changesets at these indices (before removal) were dropped
    RangeRemoved {
        /// Dropped indices
        range: Range<usize>,
    },
}

/// Callback invoked for every [`HistoryEvent`]
pub type HistoryListener = Box<dyn Fn(&HistoryEvent) + Send + Sync>;

/// A single undo/redo timeline.
///
/// Committing after an undo discards the undone tail.
pub struct LinearHistory<V> {
    changesets: Vec<Changeset<V>>,
    current: usize,
    listeners: Vec<HistoryListener>,
}

impl<V> LinearHistory<V> {
    /// Create an empty history
    pub fn new() -> Self {
        LinearHistory {
            changesets: Vec::new(),
            current: 0,
            listeners: Vec::new(),
        }
    }

    /// Register a listener for index changes and removals.
    ///
    /// Listeners run while the history is borrowed and must not call back
    /// into it.
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: Fn(&HistoryEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Number of changesets currently applied
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Get paginated history
    pub fn get_history(&self, limit: usize, offset: usize) -> Vec<HistoryEntry> {
        self.changesets
            .iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(index, changeset)| self.entry(index, changeset))
            .collect()
    }

    /// Get details of a specific changeset
    pub fn get_entry(&self, id: Uuid) -> Result<HistoryEntry> {
        self.changesets
            .iter()
            .enumerate()
            .find(|(_, changeset)| changeset.id() == id)
            .map(|(index, changeset)| self.entry(index, changeset))
            .ok_or(UndoRedoError::ChangesetNotFound(id))
    }

    /// Get the total number of changesets in history
    pub fn total_changesets(&self) -> usize {
        self.changesets.len()
    }

    /// Get the number of undoable changesets
    pub fn undoable_count(&self) -> usize {
        self.current
    }

    /// Get the number of redoable changesets
    pub fn redoable_count(&self) -> usize {
        self.changesets.len() - self.current
    }

    /// Forget every changeset without touching tracked state
    pub fn remove_all(&mut self) {
        let count = self.changesets.len();
        debug!(count, "Removing all history");
        self.changesets.clear();
        self.set_current(0);
        self.emit_removed(0..count);
    }

    fn set_current(&mut self, index: usize) {
        if self.current != index {
            self.current = index;
            self.emit(&HistoryEvent::IndexChanged { index });
        }
    }

    fn emit_removed(&self, range: Range<usize>) {
        if !range.is_empty() {
            self.emit(&HistoryEvent::RangeRemoved { range });
        }
    }

    fn emit(&self, event: &HistoryEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    fn entry(&self, index: usize, changeset: &Changeset<V>) -> HistoryEntry {
        HistoryEntry {
            changeset: changeset.summary(),
            index,
            is_undone: index >= self.current,
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index > self.changesets.len() {
            return Err(UndoRedoError::validation_error(format!(
                "history index {} out of range (0..={})",
                index,
                self.changesets.len()
            )));
        }
        Ok(())
    }
}

impl<V> LinearHistory<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    /// Drop every changeset before `index`, first redoing up to it so the
    /// dropped changesets are all applied
    pub fn remove_to(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        while self.current < index {
            History::redo(self)?;
        }
        self.changesets.drain(..index);
        self.set_current(self.current - index);
        self.emit_removed(0..index);
        debug!(removed = index, current = self.current, "Removed history prefix");
        Ok(())
    }

    /// Drop every changeset from `index` on, first undoing back to it so the
    /// dropped changesets are all reverted
    pub fn remove_from(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        while self.current > index {
            History::undo(self)?;
        }
        let total = self.changesets.len();
        self.changesets.truncate(index);
        self.emit_removed(index..total);
        debug!(removed = total - index, current = self.current, "Removed history suffix");
        Ok(())
    }
}

impl<V> History<V> for LinearHistory<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    fn record(&mut self, changeset: Changeset<V>) -> Result<()> {
        let total = self.changesets.len();
        if total > self.current {
            debug!(discarded = total - self.current, "Discarding undone changesets");
            self.changesets.truncate(self.current);
            self.emit_removed(self.current..total);
        }
        info!(id = %changeset.id(), descriptor = changeset.descriptor(), "Recorded changeset");
        self.changesets.push(changeset);
        self.set_current(self.changesets.len());
        Ok(())
    }

    fn undo(&mut self) -> Result<()> {
        if self.current == 0 {
            return Err(UndoRedoError::NoMoreUndos);
        }
        self.changesets[self.current - 1].undo()?;
        self.set_current(self.current - 1);
        Ok(())
    }

    fn redo(&mut self) -> Result<()> {
        let changeset = self
            .changesets
            .get(self.current)
            .ok_or(UndoRedoError::NoMoreRedos)?;
        changeset.redo()?;
        self.set_current(self.current + 1);
        Ok(())
    }

    fn can_undo(&self) -> bool {
        self.current > 0
    }

    fn can_redo(&self) -> bool {
        self.current < self.changesets.len()
    }

    fn reinitialize(&mut self) {
        self.remove_all();
    }
}

impl<V> Default for LinearHistory<V> {
    fn default() -> Self {
        Self::new()
    }
}
