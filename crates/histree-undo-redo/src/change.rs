//! Recorded changes and their replay
//!
//! A [`Change`] is either a single field update or a container delta. Each
//! knows how to re-apply itself ([`Change::redo`]) and how to revert itself
//! ([`Change::undo`]) against the object it observed, which it only holds
//! weakly.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, UndoRedoError};
use crate::field::{FieldId, FieldOwner};
use crate::target::{SequenceTarget, SetTarget};

/// Kind of structural container mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionAction {
    /// Items were inserted
    Add,
    /// Items were removed
    Remove,
    /// Items were overwritten
    Replace,
    /// Items were moved to another position
    Move,
    /// The container was cleared without its prior contents being captured
    Reset,
}

impl fmt::Display for CollectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionAction::Add => write!(f, "Add"),
            CollectionAction::Remove => write!(f, "Remove"),
            CollectionAction::Replace => write!(f, "Replace"),
            CollectionAction::Move => write!(f, "Move"),
            CollectionAction::Reset => write!(f, "Reset"),
        }
    }
}

/// A container mutation notification.
///
/// Start positions are `None` when unknown or when the container is
/// unordered.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerEvent<V> {
    /// What happened
    pub action: CollectionAction,
    /// Items that left the container (or were overwritten / moved)
    pub old_items: Vec<V>,
    /// Items that entered the container
    pub new_items: Vec<V>,
    /// Position of the first old item before the mutation
    pub old_start: Option<usize>,
    /// Position of the first new item after the mutation
    pub new_start: Option<usize>,
}

impl<V> ContainerEvent<V> {
    /// Items inserted at `at`
    pub fn add(items: Vec<V>, at: Option<usize>) -> Self {
        Self {
            action: CollectionAction::Add,
            old_items: Vec::new(),
            new_items: items,
            old_start: None,
            new_start: at,
        }
    }

    /// Items removed from `at`
    pub fn remove(items: Vec<V>, at: Option<usize>) -> Self {
        Self {
            action: CollectionAction::Remove,
            old_items: items,
            new_items: Vec::new(),
            old_start: at,
            new_start: None,
        }
    }

    /// Items at `at` overwritten in place
    pub fn replace(old_items: Vec<V>, new_items: Vec<V>, at: Option<usize>) -> Self {
        Self {
            action: CollectionAction::Replace,
            old_items,
            new_items,
            old_start: at,
            new_start: at,
        }
    }

    /// A run of items moved from `from` to `to` (index in the resulting sequence)
    pub fn moved(items: Vec<V>, from: usize, to: usize) -> Self
    where
        V: Clone,
    {
        Self {
            action: CollectionAction::Move,
            old_items: items.clone(),
            new_items: items,
            old_start: Some(from),
            new_start: Some(to),
        }
    }

    /// A bare clear with unknown prior contents
    pub fn reset() -> Self {
        Self {
            action: CollectionAction::Reset,
            old_items: Vec::new(),
            new_items: Vec::new(),
            old_start: None,
            new_start: None,
        }
    }
}

/// A single field assignment
#[derive(Clone)]
pub struct FieldChange<V> {
    /// Object the field belongs to
    pub owner: Weak<dyn FieldOwner<V>>,
    /// Field that was assigned
    pub field: FieldId,
    /// Value before the assignment
    pub old_value: V,
    /// Value after the assignment
    pub new_value: V,
}

impl<V> FieldChange<V> {
    /// Record a field change against `owner`
    pub fn new(owner: &Arc<dyn FieldOwner<V>>, field: FieldId, old_value: V, new_value: V) -> Self {
        Self {
            owner: Arc::downgrade(owner),
            field,
            old_value,
            new_value,
        }
    }

    /// Identity of the owner, for grouping
    pub fn owner_key(&self) -> usize {
        Weak::as_ptr(&self.owner) as *const () as usize
    }
}

impl<V: Clone> FieldChange<V> {
    fn assign(&self, value: &V) -> Result<()> {
        let owner = self
            .owner
            .upgrade()
            .ok_or_else(|| UndoRedoError::released(format!("owner of field {}", self.field)))?;
        owner.write_field(self.field, value.clone())
    }
}

/// A mutation of an order-preserving container
#[derive(Clone)]
pub struct SequenceDelta<V> {
    /// Container the delta applies to
    pub target: Weak<dyn SequenceTarget<V>>,
    /// Kind of mutation
    pub action: CollectionAction,
    /// Items removed / overwritten / moved
    pub old_items: Vec<V>,
    /// Items inserted
    pub new_items: Vec<V>,
    /// Start of the old items before the mutation
    pub old_start: Option<usize>,
    /// Start of the new items after the mutation
    pub new_start: Option<usize>,
}

impl<V> SequenceDelta<V> {
    /// Build a delta from a notification
    pub fn from_event(target: Weak<dyn SequenceTarget<V>>, event: ContainerEvent<V>) -> Self {
        Self {
            target,
            action: event.action,
            old_items: event.old_items,
            new_items: event.new_items,
            old_start: event.old_start,
            new_start: event.new_start,
        }
    }

    /// Identity of the container, for grouping
    pub fn target_key(&self) -> usize {
        Weak::as_ptr(&self.target) as *const () as usize
    }
}

/// A mutation of an unordered container
#[derive(Clone)]
pub struct SetDelta<V> {
    /// Container the delta applies to
    pub target: Weak<dyn SetTarget<V>>,
    /// Kind of mutation
    pub action: CollectionAction,
    /// Items removed
    pub old_items: Vec<V>,
    /// Items added
    pub new_items: Vec<V>,
}

impl<V> SetDelta<V> {
    /// Build a delta from a notification; positions are ignored
    pub fn from_event(target: Weak<dyn SetTarget<V>>, event: ContainerEvent<V>) -> Self {
        Self {
            target,
            action: event.action,
            old_items: event.old_items,
            new_items: event.new_items,
        }
    }

    /// Identity of the container, for grouping
    pub fn target_key(&self) -> usize {
        Weak::as_ptr(&self.target) as *const () as usize
    }
}

/// One recorded change
#[derive(Clone)]
pub enum Change<V> {
    /// Field assignment
    Field(FieldChange<V>),
    /// Ordered container delta
    Sequence(SequenceDelta<V>),
    /// Unordered container delta
    Set(SetDelta<V>),
}

impl<V> Change<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    /// Re-apply the change, assuming the target is in its pre-change state
    pub fn redo(&self) -> Result<()> {
        match self {
            Change::Field(change) => change.assign(&change.new_value),
            Change::Sequence(delta) => {
                let target = upgrade_sequence(delta)?;
                redo_sequence(target.as_ref(), delta)
            }
            Change::Set(delta) => {
                let target = upgrade_set(delta)?;
                redo_set(target.as_ref(), delta)
            }
        }
    }

    /// Revert the change, assuming the target is in its post-change state
    pub fn undo(&self) -> Result<()> {
        match self {
            Change::Field(change) => change.assign(&change.old_value),
            Change::Sequence(delta) => {
                let target = upgrade_sequence(delta)?;
                undo_sequence(target.as_ref(), delta)
            }
            Change::Set(delta) => {
                let target = upgrade_set(delta)?;
                undo_set(target.as_ref(), delta)
            }
        }
    }
}

impl<V> Change<V> {
    /// Whether this is a container reset
    pub fn is_reset(&self) -> bool {
        match self {
            Change::Field(_) => false,
            Change::Sequence(delta) => delta.action == CollectionAction::Reset,
            Change::Set(delta) => delta.action == CollectionAction::Reset,
        }
    }
}

fn upgrade_sequence<V>(delta: &SequenceDelta<V>) -> Result<Arc<dyn SequenceTarget<V>>> {
    delta
        .target
        .upgrade()
        .ok_or_else(|| UndoRedoError::released(format!("sequence container ({})", delta.action)))
}

fn upgrade_set<V>(delta: &SetDelta<V>) -> Result<Arc<dyn SetTarget<V>>> {
    delta
        .target
        .upgrade()
        .ok_or_else(|| UndoRedoError::released(format!("set container ({})", delta.action)))
}

fn redo_sequence<V>(target: &dyn SequenceTarget<V>, delta: &SequenceDelta<V>) -> Result<()>
where
    V: Clone + PartialEq + fmt::Debug,
{
    match delta.action {
        CollectionAction::Add => {
            insert_run(target, delta.new_start, &delta.new_items);
            Ok(())
        }
        CollectionAction::Remove => remove_run(target, delta.old_start, &delta.old_items),
        CollectionAction::Replace => {
            if overwrite_run(target, delta, &delta.old_items, &delta.new_items) {
                return Ok(());
            }
            remove_run(target, delta.old_start, &delta.old_items)?;
            insert_run(target, delta.new_start, &delta.new_items);
            Ok(())
        }
        CollectionAction::Move => {
            let (from, to) = move_positions(delta)?;
            remove_run(target, Some(from), &delta.old_items)?;
            insert_run(target, Some(to), &delta.new_items);
            Ok(())
        }
        CollectionAction::Reset => {
            target.clear();
            Ok(())
        }
    }
}

fn undo_sequence<V>(target: &dyn SequenceTarget<V>, delta: &SequenceDelta<V>) -> Result<()>
where
    V: Clone + PartialEq + fmt::Debug,
{
    match delta.action {
        CollectionAction::Add => remove_run(target, delta.new_start, &delta.new_items),
        CollectionAction::Remove => {
            insert_run(target, delta.old_start, &delta.old_items);
            Ok(())
        }
        CollectionAction::Replace => {
            if overwrite_run(target, delta, &delta.new_items, &delta.old_items) {
                return Ok(());
            }
            remove_run(target, delta.new_start, &delta.new_items)?;
            insert_run(target, delta.old_start, &delta.old_items);
            Ok(())
        }
        CollectionAction::Move => {
            let (from, to) = move_positions(delta)?;
            remove_run(target, Some(to), &delta.new_items)?;
            insert_run(target, Some(from), &delta.old_items);
            Ok(())
        }
        CollectionAction::Reset => Err(UndoRedoError::unsupported(
            "a reset without captured prior contents cannot be undone",
        )),
    }
}

fn move_positions<V>(delta: &SequenceDelta<V>) -> Result<(usize, usize)> {
    match (delta.old_start, delta.new_start) {
        (Some(from), Some(to)) => Ok((from, to)),
        _ => Err(UndoRedoError::unsupported(
            "move requires known start positions",
        )),
    }
}

/// Insert `items` starting at `start` when it is still valid, else append.
fn insert_run<V: Clone>(target: &dyn SequenceTarget<V>, start: Option<usize>, items: &[V]) {
    match start {
        Some(start) if start <= target.len() => {
            for (offset, item) in items.iter().enumerate() {
                target.insert(start + offset, item.clone());
            }
        }
        _ => {
            for item in items {
                target.push(item.clone());
            }
        }
    }
}

/// Remove `items`, positionally when the run at `start` still matches,
/// otherwise by value.
fn remove_run<V>(target: &dyn SequenceTarget<V>, start: Option<usize>, items: &[V]) -> Result<()>
where
    V: PartialEq + fmt::Debug,
{
    if let Some(start) = start {
        if run_matches(target, start, items) {
            // highest index first so earlier indices stay put
            for index in (start..start + items.len()).rev() {
                target.remove_at(index);
            }
            return Ok(());
        }
        warn!(
            start,
            count = items.len(),
            "Positional removal no longer matches, falling back to value-based removal"
        );
    }

    for item in items {
        let index = target.position_of(item).ok_or_else(|| {
            UndoRedoError::inconsistent(format!("item {:?} not found in sequence", item))
        })?;
        target.remove_at(index);
    }
    Ok(())
}

fn run_matches<V: PartialEq>(target: &dyn SequenceTarget<V>, start: usize, items: &[V]) -> bool {
    start + items.len() <= target.len()
        && items
            .iter()
            .enumerate()
            .all(|(offset, item)| target.get(start + offset).as_ref() == Some(item))
}

/// In-place overwrite for replaces that kept their position and length.
/// Returns `false` when the decomposed path must be taken instead.
fn overwrite_run<V>(
    target: &dyn SequenceTarget<V>,
    delta: &SequenceDelta<V>,
    current: &[V],
    replacement: &[V],
) -> bool
where
    V: Clone + PartialEq,
{
    let start = match (delta.old_start, delta.new_start) {
        (Some(old), Some(new)) if old == new => old,
        _ => return false,
    };
    if current.len() != replacement.len() || !run_matches(target, start, current) {
        return false;
    }
    for (offset, item) in replacement.iter().enumerate() {
        target.set(start + offset, item.clone());
    }
    true
}

fn redo_set<V>(target: &dyn SetTarget<V>, delta: &SetDelta<V>) -> Result<()>
where
    V: Clone + fmt::Debug,
{
    match delta.action {
        CollectionAction::Add => add_items(target, &delta.new_items),
        CollectionAction::Remove => remove_items(target, &delta.old_items),
        CollectionAction::Replace | CollectionAction::Move => {
            remove_items(target, &delta.old_items)?;
            add_items(target, &delta.new_items)
        }
        CollectionAction::Reset => {
            target.clear();
            Ok(())
        }
    }
}

fn undo_set<V>(target: &dyn SetTarget<V>, delta: &SetDelta<V>) -> Result<()>
where
    V: Clone + fmt::Debug,
{
    match delta.action {
        CollectionAction::Add => remove_items(target, &delta.new_items),
        CollectionAction::Remove => add_items(target, &delta.old_items),
        CollectionAction::Replace | CollectionAction::Move => {
            remove_items(target, &delta.new_items)?;
            add_items(target, &delta.old_items)
        }
        CollectionAction::Reset => Err(UndoRedoError::unsupported(
            "a reset without captured prior contents cannot be undone",
        )),
    }
}

fn add_items<V: Clone + fmt::Debug>(target: &dyn SetTarget<V>, items: &[V]) -> Result<()> {
    for item in items {
        if !target.insert(item.clone()) {
            warn!(?item, "Item already present while replaying set addition");
        }
    }
    Ok(())
}

fn remove_items<V: fmt::Debug>(target: &dyn SetTarget<V>, items: &[V]) -> Result<()> {
    for item in items {
        if !target.remove(item) {
            return Err(UndoRedoError::inconsistent(format!(
                "item {:?} not found in set",
                item
            )));
        }
    }
    Ok(())
}

impl<V: fmt::Debug> fmt::Debug for FieldChange<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldChange")
            .field("owner", &self.owner_key())
            .field("field", &self.field)
            .field("old_value", &self.old_value)
            .field("new_value", &self.new_value)
            .finish()
    }
}

impl<V: fmt::Debug> fmt::Debug for SequenceDelta<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceDelta")
            .field("target", &self.target_key())
            .field("action", &self.action)
            .field("old_items", &self.old_items)
            .field("new_items", &self.new_items)
            .field("old_start", &self.old_start)
            .field("new_start", &self.new_start)
            .finish()
    }
}

impl<V: fmt::Debug> fmt::Debug for SetDelta<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetDelta")
            .field("target", &self.target_key())
            .field("action", &self.action)
            .field("old_items", &self.old_items)
            .field("new_items", &self.new_items)
            .finish()
    }
}

impl<V: fmt::Debug> fmt::Debug for Change<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Field(change) => change.fmt(f),
            Change::Sequence(delta) => delta.fmt(f),
            Change::Set(delta) => delta.fmt(f),
        }
    }
}

impl<V: fmt::Debug> fmt::Display for Change<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Field(change) => write!(
                f,
                "field {}: {:?} -> {:?}",
                change.field, change.old_value, change.new_value
            ),
            Change::Sequence(delta) => write!(
                f,
                "sequence {} {:?}@{:?} -> {:?}@{:?}",
                delta.action, delta.old_items, delta.old_start, delta.new_items, delta.new_start
            ),
            Change::Set(delta) => write!(
                f,
                "set {} -{:?} +{:?}",
                delta.action, delta.old_items, delta.new_items
            ),
        }
    }
}
