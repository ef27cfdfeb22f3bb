//! Changeset compaction
//!
//! Reduces the raw change list of one transaction to a shorter list with the
//! same forward and backward effect:
//!
//! - field updates to the same `(owner, field)` collapse into one change
//!   carrying the first old value and the last new value;
//! - deltas against one ordered container collapse into a run of `Add`
//!   deltas followed by a run of `Remove` deltas, with adds that re-insert a
//!   pending removal (and removals of pending adds) cancelled out;
//! - deltas against one unordered container collapse into at most one
//!   `Add`, `Remove` or `Replace`.
//!
//! Each compacted group takes the position of its first raw change. Targets
//! are independent, so moving a group relative to other targets is safe.
//!
//! Ordered compaction works on a run-length description of the container as
//! it looked before the transaction, interleaved with pending additions:
//! untouched original items are counted but never materialised, so nothing
//! needs to be known about the container beyond what the deltas say.

use std::collections::HashMap;
use std::fmt;
use std::sync::Weak;

use tracing::debug;

use crate::change::{Change, CollectionAction, FieldChange, SequenceDelta, SetDelta};
use crate::error::{Result, UndoRedoError};
use crate::field::FieldId;
use crate::models::span_in_range;
use crate::target::{SequenceTarget, SetTarget};

/// Compact a change list. Merging an already merged list returns it unchanged.
pub fn merge_changes<V>(changes: Vec<Change<V>>) -> Result<Vec<Change<V>>>
where
    V: Clone + PartialEq + fmt::Debug,
{
    let before = changes.len();
    let mut groups: Vec<Group<V>> = Vec::new();
    let mut fields: HashMap<(usize, FieldId), usize> = HashMap::new();
    let mut sequences: HashMap<usize, usize> = HashMap::new();
    let mut sets: HashMap<usize, usize> = HashMap::new();

    for change in changes {
        match change {
            Change::Field(change) => {
                let key = (change.owner_key(), change.field);
                match fields.get(&key) {
                    Some(&index) => {
                        if let Group::Field(existing) = &mut groups[index] {
                            existing.new_value = change.new_value;
                        }
                    }
                    None => {
                        fields.insert(key, groups.len());
                        groups.push(Group::Field(change));
                    }
                }
            }
            Change::Sequence(delta) => {
                let index = *sequences.entry(delta.target_key()).or_insert_with(|| {
                    groups.push(Group::Sequence(SequenceGroup::new(delta.target.clone())));
                    groups.len() - 1
                });
                if let Group::Sequence(group) = &mut groups[index] {
                    group.deltas.push(delta);
                }
            }
            Change::Set(delta) => {
                let index = *sets.entry(delta.target_key()).or_insert_with(|| {
                    groups.push(Group::Set(SetAggregate::new(delta.target.clone())));
                    groups.len() - 1
                });
                if let Group::Set(aggregate) = &mut groups[index] {
                    aggregate.absorb(delta)?;
                }
            }
        }
    }

    let mut merged = Vec::with_capacity(groups.len());
    for group in groups {
        match group {
            Group::Field(change) => merged.push(Change::Field(change)),
            Group::Sequence(group) => merged.extend(group.finish()?),
            Group::Set(aggregate) => merged.extend(aggregate.finish()),
        }
    }

    debug!(before, after = merged.len(), "Merged changes");
    Ok(merged)
}

enum Group<V> {
    Field(FieldChange<V>),
    Sequence(SequenceGroup<V>),
    Set(SetAggregate<V>),
}

/// All deltas seen for one ordered container
struct SequenceGroup<V> {
    target: Weak<dyn SequenceTarget<V>>,
    deltas: Vec<SequenceDelta<V>>,
}

impl<V> SequenceGroup<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    fn new(target: Weak<dyn SequenceTarget<V>>) -> Self {
        Self {
            target,
            deltas: Vec::new(),
        }
    }

    fn finish(self) -> Result<Vec<Change<V>>> {
        if self
            .deltas
            .iter()
            .any(|delta| delta.action == CollectionAction::Reset)
        {
            return Err(UndoRedoError::unsupported(
                "cannot merge a reset without captured prior contents",
            ));
        }

        // Without positions there is no coordinate space to compact in;
        // the raw deltas are still a valid replay.
        if !self.deltas.iter().all(is_positioned) {
            debug!(
                count = self.deltas.len(),
                "Sequence deltas without positions, keeping them unmerged"
            );
            return Ok(self.deltas.into_iter().map(Change::Sequence).collect());
        }

        if let Some(delta) = self.deltas.iter().find(|delta| !positions_in_range(delta)) {
            return Err(UndoRedoError::validation_error(format!(
                "{} delta has start positions {:?}/{:?} out of range",
                delta.action, delta.old_start, delta.new_start
            )));
        }

        let mut aggregate = SequenceAggregate::new();
        for delta in &self.deltas {
            match delta.action {
                CollectionAction::Add => {
                    aggregate.add(delta.new_start.unwrap_or_default(), &delta.new_items)
                }
                CollectionAction::Remove => {
                    aggregate.remove(delta.old_start.unwrap_or_default(), &delta.old_items)?
                }
                CollectionAction::Replace | CollectionAction::Move => {
                    aggregate.remove(delta.old_start.unwrap_or_default(), &delta.old_items)?;
                    aggregate.add(delta.new_start.unwrap_or_default(), &delta.new_items);
                }
                CollectionAction::Reset => {}
            }
        }
        Ok(aggregate.into_changes(&self.target))
    }
}

fn positions_in_range<V>(delta: &SequenceDelta<V>) -> bool {
    span_in_range(delta.old_start, delta.old_items.len())
        && span_in_range(delta.new_start, delta.new_items.len())
}

fn is_positioned<V>(delta: &SequenceDelta<V>) -> bool {
    match delta.action {
        CollectionAction::Add => delta.new_start.is_some(),
        CollectionAction::Remove => delta.old_start.is_some(),
        CollectionAction::Replace | CollectionAction::Move => {
            delta.old_start.is_some() && delta.new_start.is_some()
        }
        CollectionAction::Reset => false,
    }
}

/// One entry of the run-length container description
#[derive(Debug, Clone, PartialEq)]
enum Slot<V> {
    /// `n` original items left untouched
    Kept(usize),
    /// An item inserted by the transaction
    Added(V),
    /// An original item removed by the transaction
    Removed(V),
}

impl<V> Slot<V> {
    fn visible_len(&self) -> usize {
        match self {
            Slot::Kept(n) => *n,
            Slot::Added(_) => 1,
            Slot::Removed(_) => 0,
        }
    }

    fn original_len(&self) -> usize {
        match self {
            Slot::Kept(n) => *n,
            Slot::Added(_) => 0,
            Slot::Removed(_) => 1,
        }
    }
}

/// Pending additions and removals for one ordered container.
///
/// Visible positions are the positions the raw deltas were expressed in:
/// the container as it looks at that point of the transaction.
#[derive(Debug)]
struct SequenceAggregate<V> {
    slots: Vec<Slot<V>>,
}

impl<V> SequenceAggregate<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn visible_total(&self) -> usize {
        self.slots.iter().map(Slot::visible_len).sum()
    }

    /// Grow the described prefix so that `visible` items are covered
    fn cover(&mut self, visible: usize) {
        let total = self.visible_total();
        if visible > total {
            self.slots.push(Slot::Kept(visible - total));
        }
    }

    /// Slot index holding visible item `position`, splitting kept runs so
    /// the item sits in a slot of its own
    fn slot_of(&mut self, position: usize) -> usize {
        self.cover(position + 1);
        let mut seen = 0;
        let mut index = 0;
        loop {
            let len = self.slots[index].visible_len();
            if position < seen + len {
                if let Slot::Kept(n) = self.slots[index] {
                    let before = position - seen;
                    let after = n - before - 1;
                    let mut replacement = Vec::with_capacity(3);
                    if before > 0 {
                        replacement.push(Slot::Kept(before));
                    }
                    replacement.push(Slot::Kept(1));
                    if after > 0 {
                        replacement.push(Slot::Kept(after));
                    }
                    let offset = usize::from(before > 0);
                    self.slots.splice(index..=index, replacement);
                    return index + offset;
                }
                return index;
            }
            seen += len;
            index += 1;
        }
    }

    /// Slot index just after visible item `position - 1`
    fn insertion_point(&mut self, position: usize) -> usize {
        if position == 0 {
            return 0;
        }
        self.slot_of(position - 1) + 1
    }

    fn add(&mut self, start: usize, items: &[V]) {
        for (offset, item) in items.iter().enumerate() {
            self.add_one(start + offset, item);
        }
    }

    fn add_one(&mut self, position: usize, item: &V) {
        let at = self.insertion_point(position);
        // invisible removed originals sitting at this position can be revived
        let mut next = at;
        while let Some(Slot::Removed(removed)) = self.slots.get(next) {
            if removed == item {
                self.slots[next] = Slot::Kept(1);
                self.normalize();
                return;
            }
            next += 1;
        }
        self.slots.insert(at, Slot::Added(item.clone()));
    }

    fn remove(&mut self, start: usize, items: &[V]) -> Result<()> {
        for item in items {
            self.remove_one(start, item)?;
        }
        Ok(())
    }

    fn remove_one(&mut self, position: usize, item: &V) -> Result<()> {
        let index = self.slot_of(position);
        match &self.slots[index] {
            Slot::Added(added) if added == item => {
                self.slots.remove(index);
            }
            Slot::Added(added) => {
                return Err(UndoRedoError::inconsistent(format!(
                    "removal of {:?} at {} does not match pending addition {:?}",
                    item, position, added
                )))
            }
            _ => self.slots[index] = Slot::Removed(item.clone()),
        }
        self.normalize();
        Ok(())
    }

    /// Join neighbouring kept runs and drop empty ones
    fn normalize(&mut self) {
        let mut normalized: Vec<Slot<V>> = Vec::with_capacity(self.slots.len());
        for slot in self.slots.drain(..) {
            match (normalized.last_mut(), slot) {
                (_, Slot::Kept(0)) => {}
                (Some(Slot::Kept(previous)), Slot::Kept(n)) => *previous += n,
                (_, slot) => normalized.push(slot),
            }
        }
        self.slots = normalized;
    }

    /// Emit adds (original coordinates grown by earlier adds) then removes
    /// (coordinates after all adds, shrunk by earlier removes)
    fn into_changes(self, target: &Weak<dyn SequenceTarget<V>>) -> Vec<Change<V>> {
        let mut changes = Vec::new();

        let mut position = 0;
        let mut run: Vec<V> = Vec::new();
        let mut run_start = 0;
        for slot in &self.slots {
            if let Slot::Added(item) = slot {
                if run.is_empty() {
                    run_start = position;
                }
                run.push(item.clone());
                position += 1;
                continue;
            }
            if !run.is_empty() {
                changes.push(sequence_delta(
                    target,
                    CollectionAction::Add,
                    std::mem::take(&mut run),
                    run_start,
                ));
            }
            position += slot.original_len();
        }
        if !run.is_empty() {
            changes.push(sequence_delta(target, CollectionAction::Add, run, run_start));
        }

        let mut position = 0;
        let mut removed_before = 0;
        let mut run: Vec<V> = Vec::new();
        let mut run_start = 0;
        for slot in &self.slots {
            if let Slot::Removed(item) = slot {
                if run.is_empty() {
                    run_start = position - removed_before;
                }
                run.push(item.clone());
                position += 1;
                continue;
            }
            if !run.is_empty() {
                removed_before += run.len();
                changes.push(sequence_delta(
                    target,
                    CollectionAction::Remove,
                    std::mem::take(&mut run),
                    run_start,
                ));
            }
            position += slot.visible_len();
        }
        if !run.is_empty() {
            changes.push(sequence_delta(target, CollectionAction::Remove, run, run_start));
        }

        changes
    }
}

fn sequence_delta<V>(
    target: &Weak<dyn SequenceTarget<V>>,
    action: CollectionAction,
    items: Vec<V>,
    start: usize,
) -> Change<V> {
    let (old_items, new_items, old_start, new_start) = match action {
        CollectionAction::Add => (Vec::new(), items, None, Some(start)),
        _ => (items, Vec::new(), Some(start), None),
    };
    Change::Sequence(SequenceDelta {
        target: target.clone(),
        action,
        old_items,
        new_items,
        old_start,
        new_start,
    })
}

/// Pending additions and removals for one unordered container
struct SetAggregate<V> {
    target: Weak<dyn SetTarget<V>>,
    additions: Vec<V>,
    removals: Vec<V>,
}

impl<V> SetAggregate<V>
where
    V: Clone + PartialEq,
{
    fn new(target: Weak<dyn SetTarget<V>>) -> Self {
        Self {
            target,
            additions: Vec::new(),
            removals: Vec::new(),
        }
    }

    fn absorb(&mut self, delta: SetDelta<V>) -> Result<()> {
        match delta.action {
            CollectionAction::Add => self.add(delta.new_items),
            CollectionAction::Remove => self.remove(delta.old_items),
            CollectionAction::Replace | CollectionAction::Move => {
                self.remove(delta.old_items);
                self.add(delta.new_items);
            }
            CollectionAction::Reset => {
                return Err(UndoRedoError::unsupported(
                    "cannot merge a reset without captured prior contents",
                ))
            }
        }
        Ok(())
    }

    fn add(&mut self, items: Vec<V>) {
        for item in items {
            if let Some(index) = self.removals.iter().position(|removed| *removed == item) {
                self.removals.remove(index);
            } else if !self.additions.contains(&item) {
                self.additions.push(item);
            }
        }
    }

    fn remove(&mut self, items: Vec<V>) {
        for item in items {
            if let Some(index) = self.additions.iter().position(|added| *added == item) {
                self.additions.remove(index);
            } else if !self.removals.contains(&item) {
                self.removals.push(item);
            }
        }
    }

    fn finish(self) -> Option<Change<V>> {
        let action = match (self.removals.is_empty(), self.additions.is_empty()) {
            (true, true) => return None,
            (false, false) => CollectionAction::Replace,
            (true, false) => CollectionAction::Add,
            (false, true) => CollectionAction::Remove,
        };
        Some(Change::Set(SetDelta {
            target: self.target,
            action,
            old_items: self.removals,
            new_items: self.additions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ContainerEvent;
    use crate::test_support::{shared_list, shared_set, Counter};
    use std::sync::Arc;

    fn seq(target: &Weak<dyn SequenceTarget<i32>>, event: ContainerEvent<i32>) -> Change<i32> {
        Change::Sequence(SequenceDelta::from_event(target.clone(), event))
    }

    fn describe(changes: &[Change<i32>]) -> Vec<String> {
        changes.iter().map(|change| change.to_string()).collect()
    }

    fn redo_all(changes: &[Change<i32>]) {
        for change in changes {
            change.redo().unwrap();
        }
    }

    fn undo_all(changes: &[Change<i32>]) {
        for change in changes.iter().rev() {
            change.undo().unwrap();
        }
    }

    #[test]
    fn test_worked_list_example() {
        let (list, target) = shared_list(vec![1, 3, 7]);
        let raw = vec![
            seq(&target, ContainerEvent::add(vec![2], Some(1))),
            seq(&target, ContainerEvent::remove(vec![3], Some(2))),
            seq(&target, ContainerEvent::add(vec![5], Some(2))),
        ];
        let merged = merge_changes(raw).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(
            describe(&merged),
            vec![
                "sequence Add []@None -> [2, 5]@Some(1)",
                "sequence Remove [3]@Some(3) -> []@None",
            ]
        );

        redo_all(&merged);
        assert_eq!(*list.read(), vec![1, 2, 5, 7]);
        undo_all(&merged);
        assert_eq!(*list.read(), vec![1, 3, 7]);
    }

    #[test]
    fn test_add_then_remove_cancels() {
        let (_list, target) = shared_list(vec![1, 2]);
        let raw = vec![
            seq(&target, ContainerEvent::add(vec![9], Some(1))),
            seq(&target, ContainerEvent::remove(vec![9], Some(1))),
        ];
        assert!(merge_changes(raw).unwrap().is_empty());
    }

    #[test]
    fn test_remove_then_readd_cancels() {
        let (_list, target) = shared_list(vec![1, 2, 3]);
        let raw = vec![
            seq(&target, ContainerEvent::remove(vec![2, 3], Some(1))),
            seq(&target, ContainerEvent::add(vec![2], Some(1))),
            seq(&target, ContainerEvent::add(vec![3], Some(2))),
        ];
        assert!(merge_changes(raw).unwrap().is_empty());
    }

    #[test]
    fn test_move_back_and_forth_cancels() {
        let (_list, target) = shared_list(vec![1, 2, 3]);
        let raw = vec![
            seq(&target, ContainerEvent::moved(vec![1], 0, 2)),
            seq(&target, ContainerEvent::moved(vec![1], 2, 0)),
        ];
        assert!(merge_changes(raw).unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_removal_of_addition() {
        let (_list, target) = shared_list(vec![]);
        let raw = vec![
            seq(&target, ContainerEvent::add(vec![4], Some(0))),
            seq(&target, ContainerEvent::remove(vec![5], Some(0))),
        ];
        assert!(matches!(
            merge_changes(raw),
            Err(UndoRedoError::InconsistentReplay(_))
        ));
    }

    #[test]
    fn test_reset_is_rejected() {
        let (_list, target) = shared_list(vec![1]);
        let raw = vec![seq(&target, ContainerEvent::reset())];
        assert!(matches!(
            merge_changes(raw),
            Err(UndoRedoError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_unaddressable_start_is_rejected() {
        let (_list, target) = shared_list(vec![1]);
        let raw = vec![
            seq(&target, ContainerEvent::add(vec![2], Some(1))),
            seq(&target, ContainerEvent::add(vec![3], Some(usize::MAX))),
        ];
        assert!(matches!(
            merge_changes(raw),
            Err(UndoRedoError::ValidationError(_))
        ));

        let raw = vec![seq(&target, ContainerEvent::remove(vec![1], Some(usize::MAX)))];
        assert!(merge_changes(raw).is_err());
    }

    #[test]
    fn test_unpositioned_deltas_pass_through() {
        let (_list, target) = shared_list(vec![1]);
        let raw = vec![
            seq(&target, ContainerEvent::add(vec![2], None)),
            seq(&target, ContainerEvent::add(vec![3], Some(0))),
        ];
        let merged = merge_changes(raw).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_field_coalescing() {
        let counter = Counter::shared(0);
        let owner: Arc<dyn crate::field::FieldOwner<i32>> = counter.clone();
        let value = counter.field("value").unwrap();
        let raw = vec![
            Change::Field(FieldChange::new(&owner, value, 0, 1)),
            Change::Field(FieldChange::new(&owner, value, 1, 2)),
        ];
        let merged = merge_changes(raw).unwrap();
        assert_eq!(merged.len(), 1);
        match &merged[0] {
            Change::Field(change) => {
                assert_eq!(change.old_value, 0);
                assert_eq!(change.new_value, 2);
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_groups_keep_first_position() {
        let counter = Counter::shared(0);
        let owner: Arc<dyn crate::field::FieldOwner<i32>> = counter.clone();
        let value = counter.field("value").unwrap();
        let (_list, target) = shared_list(vec![]);
        let raw = vec![
            seq(&target, ContainerEvent::add(vec![1], Some(0))),
            Change::Field(FieldChange::new(&owner, value, 0, 1)),
            seq(&target, ContainerEvent::add(vec![2], Some(1))),
        ];
        let merged = merge_changes(raw).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(matches!(merged[0], Change::Sequence(_)));
        assert!(matches!(merged[1], Change::Field(_)));
    }

    #[test]
    fn test_set_add_remove_cancels() {
        let (_set, target) = shared_set(vec![]);
        let raw = vec![
            Change::Set(SetDelta::from_event(target.clone(), ContainerEvent::add(vec![7], None))),
            Change::Set(SetDelta::from_event(target.clone(), ContainerEvent::remove(vec![7], None))),
        ];
        assert!(merge_changes(raw).unwrap().is_empty());
    }

    #[test]
    fn test_set_merges_into_replace() {
        let (set, target) = shared_set(vec![1, 2]);
        let raw = vec![
            Change::Set(SetDelta::from_event(target.clone(), ContainerEvent::remove(vec![1], None))),
            Change::Set(SetDelta::from_event(target.clone(), ContainerEvent::add(vec![3], None))),
            Change::Set(SetDelta::from_event(target.clone(), ContainerEvent::add(vec![4], None))),
            Change::Set(SetDelta::from_event(target.clone(), ContainerEvent::remove(vec![4], None))),
        ];
        let merged = merge_changes(raw).unwrap();
        assert_eq!(merged.len(), 1);
        match &merged[0] {
            Change::Set(delta) => {
                assert_eq!(delta.action, CollectionAction::Replace);
                assert_eq!(delta.old_items, vec![1]);
                assert_eq!(delta.new_items, vec![3]);
            }
            other => panic!("unexpected change {:?}", other),
        }

        merged[0].redo().unwrap();
        assert_eq!(
            *set.read(),
            std::collections::HashSet::from([2, 3])
        );
    }

    #[test]
    fn test_idempotent_on_example() {
        let (_list, target) = shared_list(vec![1, 3, 7]);
        let raw = vec![
            seq(&target, ContainerEvent::add(vec![2], Some(1))),
            seq(&target, ContainerEvent::remove(vec![3], Some(2))),
            seq(&target, ContainerEvent::add(vec![5], Some(2))),
        ];
        let once = merge_changes(raw).unwrap();
        let twice = merge_changes(once.clone()).unwrap();
        assert_eq!(describe(&once), describe(&twice));
    }
}
