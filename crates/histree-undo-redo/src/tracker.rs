//! Transaction coordinator
//!
//! [`ChangeTracker`] decides what gets recorded and when. Mutators report to
//! it explicitly: field assignments are bracketed by
//! [`field_capture_begin`](ChangeTracker::field_capture_begin) /
//! [`field_capture_end`](ChangeTracker::field_capture_end), containers
//! report their events through the sequence or set entry points. Changes are
//! collected into the open [`Changeset`] and handed to the history backend on
//! the outermost commit.
//!
//! Bookkeeping lives behind one mutex that is only held for the duration of
//! each call. The history backend sits behind a second mutex; undo and redo
//! run with the tracker suspended so notifications raised by replay are not
//! recorded again.

use std::fmt;
use std::sync::Arc;

use histree_common::format_error;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::change::{Change, ContainerEvent, FieldChange, SequenceDelta, SetDelta};
use crate::changeset::Changeset;
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::field::{FieldId, FieldOwner};
use crate::history::{History, HistoryEntry, HistoryEvent, LinearHistory};
use crate::models::ChangeValidator;
use crate::target::{SequenceTarget, SetTarget};
use crate::tree::{BranchInfo, NodeId, VersionTree};

/// Bounds every tracked value type satisfies
pub trait TrackedValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> TrackedValue for T where T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

struct PendingCapture<V> {
    owner: Arc<dyn FieldOwner<V>>,
    field: FieldId,
    old_value: V,
    new_value: V,
}

struct TrackerState<V> {
    tracking_enabled: bool,
    replaying: bool,
    nest_count: usize,
    capture_depth: usize,
    open: Option<Changeset<V>>,
    pending: Option<PendingCapture<V>>,
}

impl<V> TrackerState<V> {
    fn suspended(&self) -> bool {
        !self.tracking_enabled || self.replaying || self.capture_depth > 0
    }
}

/// Records changes into changesets and replays them through a history backend
pub struct ChangeTracker<V, H = VersionTree<V>> {
    id: Uuid,
    config: TrackerConfig,
    state: Mutex<TrackerState<V>>,
    history: Mutex<H>,
}

impl<V: TrackedValue> ChangeTracker<V, VersionTree<V>> {
    /// Create a tracker with a branching history
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_history(config, VersionTree::new())
    }

    /// Redo along a specific branch of the current node
    pub fn redo_branch(&self, branch: usize) -> Result<NodeId> {
        self.replay(|tree| tree.redo(Some(branch)))
    }

    /// Replay the history to `node`
    pub fn move_to(&self, node: NodeId) -> Result<()> {
        self.replay(|tree| tree.move_to(node))
    }

    /// Discard everything before `node`
    pub fn make_root(&self, node: NodeId) -> Result<()> {
        self.replay(|tree| tree.make_root(node))
    }

    /// Collapse the history to the path through `node`
    pub fn prune_to_linear(&self, node: NodeId) -> Result<()> {
        self.replay(|tree| tree.prune_to_linear(node))
    }

    /// Discard everything after `node`
    pub fn clear_branches(&self, node: NodeId) -> Result<()> {
        self.replay(|tree| tree.clear_branches(node))
    }

    /// The current node
    pub fn current_node(&self) -> NodeId {
        self.history.lock().current()
    }

    /// Redo choices out of `node`
    pub fn branches(&self, node: NodeId) -> Result<Vec<BranchInfo>> {
        self.history.lock().branches(node)
    }
}

impl<V: TrackedValue> ChangeTracker<V, LinearHistory<V>> {
    /// Create a tracker with a single undo/redo timeline
    pub fn linear(config: TrackerConfig) -> Self {
        Self::with_history(config, LinearHistory::new())
    }

    /// Drop every changeset before `index`
    pub fn remove_to(&self, index: usize) -> Result<()> {
        self.replay(|history| history.remove_to(index))
    }

    /// Drop every changeset from `index` on
    pub fn remove_from(&self, index: usize) -> Result<()> {
        self.replay(|history| history.remove_from(index))
    }

    /// Get paginated history
    pub fn get_history(&self, limit: usize, offset: usize) -> Vec<HistoryEntry> {
        self.history.lock().get_history(limit, offset)
    }

    /// Register a listener for index changes and removed ranges.
    ///
    /// The listener runs with the history locked; it must not call back into
    /// the tracker.
    pub fn on_history_change<F>(&self, listener: F)
    where
        F: Fn(&HistoryEvent) + Send + Sync + 'static,
    {
        self.history.lock().on_change(listener);
    }
}

impl<V, H> ChangeTracker<V, H>
where
    V: TrackedValue,
    H: History<V>,
{
    /// Create a tracker around an existing history backend
    pub fn with_history(config: TrackerConfig, history: H) -> Self {
        let id = Uuid::new_v4();
        debug!(tracker = %id, ?config, "Created change tracker");
        Self {
            id,
            state: Mutex::new(TrackerState {
                tracking_enabled: config.tracking_enabled,
                replaying: false,
                nest_count: 0,
                capture_depth: 0,
                open: None,
                pending: None,
            }),
            config,
            history: Mutex::new(history),
        }
    }

    /// Tracker id, stamped on every changeset it opens
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration the tracker was created with
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Turn recording on or off
    pub fn set_tracking_enabled(&self, enabled: bool) {
        self.state.lock().tracking_enabled = enabled;
    }

    /// Whether recording is on
    pub fn is_tracking_enabled(&self) -> bool {
        self.state.lock().tracking_enabled
    }

    /// Whether notifications are currently ignored: tracking disabled,
    /// history replaying, or a field capture in progress
    pub fn is_tracking_suspended(&self) -> bool {
        self.state.lock().suspended()
    }

    /// Current changeset nesting depth
    pub fn nest_count(&self) -> usize {
        self.state.lock().nest_count
    }

    /// Number of changes in the open changeset, if one is open
    pub fn open_changeset_len(&self) -> Option<usize> {
        self.state.lock().open.as_ref().map(Changeset::len)
    }

    /// Open a changeset, or nest into the one already open.
    /// Returns the new nesting depth.
    pub fn start_changeset(&self, descriptor: impl Into<String>) -> usize {
        self.start_changeset_with(|owner| Changeset::new(owner, descriptor))
    }

    /// Like [`start_changeset`](Self::start_changeset), but the changeset is
    /// produced by `build`, given the tracker id. `build` only runs when a
    /// new changeset is actually opened.
    pub fn start_changeset_with<F>(&self, build: F) -> usize
    where
        F: FnOnce(Uuid) -> Changeset<V>,
    {
        let mut state = self.state.lock();
        state.nest_count += 1;
        if state.nest_count == 1 && state.tracking_enabled {
            let changeset = build(self.id);
            debug!(id = %changeset.id(), descriptor = changeset.descriptor(), "Opened changeset");
            state.open = Some(changeset);
        }
        state.nest_count
    }

    /// Begin capturing an assignment of `new_value` to `field`.
    ///
    /// Only the outermost capture of a nest is recorded. If reading the
    /// current value fails nothing is begun.
    pub fn field_capture_begin<O>(&self, owner: &Arc<O>, field: FieldId, new_value: V) -> Result<()>
    where
        O: FieldOwner<V> + 'static,
    {
        let mut state = self.state.lock();
        if state.suspended() || state.open.is_none() {
            state.capture_depth += 1;
            return Ok(());
        }
        let old_value = owner.read_field(field)?;
        let owner: Arc<dyn FieldOwner<V>> = owner.clone();
        debug!(
            field = owner.field_name(field).unwrap_or("?"),
            ?old_value,
            ?new_value,
            "Field capture begin"
        );
        state.pending = Some(PendingCapture {
            owner,
            field,
            old_value,
            new_value,
        });
        state.capture_depth += 1;
        Ok(())
    }

    /// Finish the innermost capture, recording it if it is the outermost one
    pub fn field_capture_end(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut result = Ok(());
        if state.capture_depth == 1 && state.open.is_some() {
            if let Some(pending) = state.pending.take() {
                let change = Change::Field(FieldChange::new(
                    &pending.owner,
                    pending.field,
                    pending.old_value,
                    pending.new_value,
                ));
                result = self.append(&mut state, change);
            }
        }
        state.capture_depth = state.capture_depth.saturating_sub(1);
        result
    }

    /// Drop the pending outermost capture. The capture stays open until
    /// [`field_capture_end`](Self::field_capture_end).
    pub fn field_capture_cancel(&self) {
        let mut state = self.state.lock();
        if state.capture_depth == 1 {
            state.pending = None;
        }
    }

    /// Begin a capture that ends when the returned guard is dropped
    pub fn capture_field<O>(
        &self,
        owner: &Arc<O>,
        field: FieldId,
        new_value: V,
    ) -> Result<FieldCaptureGuard<'_, V, H>>
    where
        O: FieldOwner<V> + 'static,
    {
        self.field_capture_begin(owner, field, new_value)?;
        Ok(FieldCaptureGuard {
            tracker: self,
            finished: false,
        })
    }

    /// Assign a field and record the assignment
    pub fn set_field<O>(&self, owner: &Arc<O>, field: FieldId, value: V) -> Result<()>
    where
        O: FieldOwner<V> + 'static,
    {
        let guard = self.capture_field(owner, field, value.clone())?;
        if let Err(e) = owner.write_field(field, value) {
            guard.cancel();
            return Err(e);
        }
        guard.finish()
    }

    /// Record an event raised by an order-preserving container
    pub fn sequence_changed<C>(&self, container: &Arc<C>, event: ContainerEvent<V>) -> Result<()>
    where
        C: SequenceTarget<V> + 'static,
    {
        let mut state = self.state.lock();
        if state.open.is_none() || state.suspended() {
            return Ok(());
        }
        ChangeValidator::validate_sequence_event(&event)?;
        let target: Arc<dyn SequenceTarget<V>> = container.clone();
        let change = Change::Sequence(SequenceDelta::from_event(Arc::downgrade(&target), event));
        self.append(&mut state, change)
    }

    /// Record an event raised by an unordered container
    pub fn set_changed<C>(&self, container: &Arc<C>, event: ContainerEvent<V>) -> Result<()>
    where
        C: SetTarget<V> + 'static,
    {
        let mut state = self.state.lock();
        if state.open.is_none() || state.suspended() {
            return Ok(());
        }
        ChangeValidator::validate_set_event(&event)?;
        let target: Arc<dyn SetTarget<V>> = container.clone();
        let change = Change::Set(SetDelta::from_event(Arc::downgrade(&target), event));
        self.append(&mut state, change)
    }

    /// Record the contents of an ordered container that is about to be
    /// cleared, as a removal of everything from position 0
    pub fn sequence_clearing<C>(&self, container: &Arc<C>) -> Result<()>
    where
        C: SequenceTarget<V> + 'static,
    {
        let items = container.snapshot();
        if items.is_empty() {
            return Ok(());
        }
        self.sequence_changed(container, ContainerEvent::remove(items, Some(0)))
    }

    /// Record the contents of an unordered container that is about to be
    /// cleared
    pub fn set_clearing<C>(&self, container: &Arc<C>) -> Result<()>
    where
        C: SetTarget<V> + 'static,
    {
        let items = container.snapshot();
        if items.is_empty() {
            return Ok(());
        }
        self.set_changed(container, ContainerEvent::remove(items, None))
    }

    /// Leave one nesting level; the outermost commit hands the changeset to
    /// the history. Returns the nesting depth before the call.
    ///
    /// Committing with nothing open is a no-op returning 0.
    pub fn commit(&self, merge: bool, commit_empty: bool) -> Result<usize> {
        let (nest_count, open) = {
            let mut state = self.state.lock();
            let nest_count = state.nest_count;
            if nest_count == 0 {
                debug!("Commit without an open changeset");
                return Ok(0);
            }
            state.nest_count -= 1;
            if state.nest_count > 0 {
                return Ok(nest_count);
            }
            (nest_count, state.open.take())
        };

        let Some(mut changeset) = open else {
            return Ok(nest_count);
        };
        if changeset.is_empty() && !commit_empty {
            debug!(id = %changeset.id(), "Discarding empty changeset");
            return Ok(nest_count);
        }
        if merge {
            let before = changeset.len();
            match changeset.merge() {
                Ok(()) => debug!(before, after = changeset.len(), "Merged changeset on commit"),
                // the unmerged changes stay recorded so the mutations remain undoable
                Err(e) => warn!(
                    id = %changeset.id(),
                    error = %format_error(&e),
                    "Merge failed on commit, recording unmerged changes"
                ),
            }
        }
        info!(
            id = %changeset.id(),
            descriptor = changeset.descriptor(),
            changes = changeset.len(),
            "Committing changeset"
        );
        self.history.lock().record(changeset)?;
        Ok(nest_count)
    }

    /// Commit with the configured merge and commit-empty flags
    pub fn commit_default(&self) -> Result<usize> {
        self.commit(self.config.merge_on_commit, self.config.commit_empty)
    }

    /// Revert the open changeset and discard it. Closes every nesting level.
    pub fn rollback(&self, merge: bool) -> Result<()> {
        let open = {
            let mut state = self.state.lock();
            state.nest_count = 0;
            state.open.take()
        };
        let Some(mut changeset) = open else {
            debug!("Rollback without an open changeset");
            return Ok(());
        };
        if merge {
            if let Err(e) = changeset.merge() {
                warn!(
                    id = %changeset.id(),
                    error = %format_error(&e),
                    "Merge failed on rollback, reverting unmerged changes"
                );
            }
        }
        info!(id = %changeset.id(), changes = changeset.len(), "Rolling back changeset");
        let _suspended = self.suspend();
        changeset.undo().map_err(|e| {
            error!(id = %changeset.id(), error = %format_error(&e), "Rollback failed");
            e
        })
    }

    /// Discard the open changeset without reverting anything
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if let Some(changeset) = state.open.take() {
            debug!(id = %changeset.id(), "Cancelled changeset");
        }
        state.nest_count = 0;
        state.pending = None;
    }

    /// Undo the most recent changeset
    pub fn undo(&self) -> Result<()> {
        self.replay(|history| history.undo()).map_err(|e| {
            error!(error = %format_error(&e), "Undo failed");
            e
        })
    }

    /// Redo the next changeset (the newest branch on a tree)
    pub fn redo(&self) -> Result<()> {
        self.replay(|history| history.redo()).map_err(|e| {
            error!(error = %format_error(&e), "Redo failed");
            e
        })
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        self.history.lock().can_undo()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        self.history.lock().can_redo()
    }

    /// Forget all history without touching tracked state
    pub fn reinitialize(&self) {
        self.history.lock().reinitialize();
    }

    /// Run `f` against the history with recording suspended
    pub fn replay<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        let _suspended = self.suspend();
        f(&mut self.history.lock())
    }

    /// Read the history without replaying anything
    pub fn inspect<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.history.lock())
    }

    fn append(&self, state: &mut TrackerState<V>, change: Change<V>) -> Result<()> {
        let Some(open) = state.open.as_mut() else {
            return Ok(());
        };
        debug!(change = %change, "Recorded change");
        open.push(change);
        if self.config.merge_on_the_go {
            open.merge()?;
        }
        Ok(())
    }

    fn suspend(&self) -> Suspension<'_, V> {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.replaying, true);
        Suspension {
            state: &self.state,
            previous,
        }
    }
}

impl<V, H> fmt::Debug for ChangeTracker<V, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChangeTracker")
            .field("id", &self.id)
            .field("nest_count", &state.nest_count)
            .field("capture_depth", &state.capture_depth)
            .field("open", &state.open.is_some())
            .finish()
    }
}

/// Marks the tracker as replaying until dropped
struct Suspension<'a, V> {
    state: &'a Mutex<TrackerState<V>>,
    previous: bool,
}

impl<V> Drop for Suspension<'_, V> {
    fn drop(&mut self) {
        self.state.lock().replaying = self.previous;
    }
}

/// An open field capture; ends the capture when dropped
#[must_use = "the capture ends as soon as the guard is dropped"]
pub struct FieldCaptureGuard<'a, V, H>
where
    V: TrackedValue,
    H: History<V>,
{
    tracker: &'a ChangeTracker<V, H>,
    finished: bool,
}

impl<V, H> FieldCaptureGuard<'_, V, H>
where
    V: TrackedValue,
    H: History<V>,
{
    /// Drop the pending capture so nothing is recorded
    pub fn cancel(&self) {
        self.tracker.field_capture_cancel();
    }

    /// End the capture, reporting a failure to record it
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.tracker.field_capture_end()
    }
}

impl<V, H> Drop for FieldCaptureGuard<'_, V, H>
where
    V: TrackedValue,
    H: History<V>,
{
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.tracker.field_capture_end() {
            error!(error = %format_error(&e), "Failed to record field capture");
        }
    }
}
