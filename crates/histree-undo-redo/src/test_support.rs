//! Shared fixtures for unit and property tests

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use proptest::prelude::*;

use crate::change::{Change, ContainerEvent, FieldChange};
use crate::changeset::Changeset;
use crate::field::{FieldOwner, FieldTable, TrackedObject};
use crate::target::{SequenceTarget, SetTarget};

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Counter {
    pub value: i32,
    pub label: i32,
}

impl Counter {
    pub(crate) fn shared(value: i32) -> Arc<TrackedObject<Counter, i32>> {
        let table = FieldTable::new()
            .field("value", |c: &Counter| c.value, |c: &mut Counter, v| c.value = v)
            .field("label", |c: &Counter| c.label, |c: &mut Counter, v| c.label = v);
        TrackedObject::shared(Counter { value, label: 0 }, Arc::new(table))
    }
}

/// Assign `value` to the counter's `value` field and return the changeset
/// that records it
pub(crate) fn assign(counter: &Arc<TrackedObject<Counter, i32>>, value: i32) -> Changeset<i32> {
    let owner: Arc<dyn FieldOwner<i32>> = counter.clone();
    let field = counter.field("value").unwrap();
    let old = counter.read_field(field).unwrap();
    counter.write_field(field, value).unwrap();
    let mut changeset = Changeset::new(uuid::Uuid::new_v4(), format!("set {}", value));
    changeset.push(Change::Field(FieldChange::new(&owner, field, old, value)));
    changeset
}

pub(crate) fn shared_list(items: Vec<i32>) -> (Arc<RwLock<Vec<i32>>>, Weak<dyn SequenceTarget<i32>>) {
    let list = Arc::new(RwLock::new(items));
    let target: Arc<dyn SequenceTarget<i32>> = list.clone();
    (list, Arc::downgrade(&target))
}

pub(crate) fn shared_set(items: Vec<i32>) -> (Arc<RwLock<HashSet<i32>>>, Weak<dyn SetTarget<i32>>) {
    let set = Arc::new(RwLock::new(items.into_iter().collect::<HashSet<_>>()));
    let target: Arc<dyn SetTarget<i32>> = set.clone();
    (set, Arc::downgrade(&target))
}

/// A list mutation with raw indices, normalised against the list length
/// when applied
#[derive(Debug, Clone)]
pub(crate) enum ListOp {
    Insert { at: usize, items: Vec<i32> },
    Remove { at: usize, count: usize },
    Replace { at: usize, items: Vec<i32> },
    Move { from: usize, to: usize, count: usize },
}

pub(crate) fn list_op_strategy() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        (any::<usize>(), prop::collection::vec(0i32..6, 1..4))
            .prop_map(|(at, items)| ListOp::Insert { at, items }),
        (any::<usize>(), 1usize..4).prop_map(|(at, count)| ListOp::Remove { at, count }),
        (any::<usize>(), prop::collection::vec(0i32..6, 1..3))
            .prop_map(|(at, items)| ListOp::Replace { at, items }),
        (any::<usize>(), any::<usize>(), 1usize..3)
            .prop_map(|(from, to, count)| ListOp::Move { from, to, count }),
    ]
}

/// Apply `op` to `list` and return the notification a tracked list would raise
pub(crate) fn apply_list_op(list: &mut Vec<i32>, op: &ListOp) -> ContainerEvent<i32> {
    let len = list.len();
    match op {
        ListOp::Insert { at, items } => {
            let at = at % (len + 1);
            list.splice(at..at, items.iter().copied());
            ContainerEvent::add(items.clone(), Some(at))
        }
        ListOp::Remove { count, .. } | ListOp::Move { count, .. } if len == 0 => {
            let item = *count as i32;
            list.push(item);
            ContainerEvent::add(vec![item], Some(0))
        }
        ListOp::Replace { items, .. } if len == 0 => {
            list.extend(items.iter().copied());
            ContainerEvent::add(items.clone(), Some(0))
        }
        ListOp::Remove { at, count } => {
            let at = at % len;
            let count = (*count).min(len - at);
            let removed: Vec<i32> = list.drain(at..at + count).collect();
            ContainerEvent::remove(removed, Some(at))
        }
        ListOp::Replace { at, items } => {
            let at = at % len;
            let count = items.len().min(len - at);
            let replacement = &items[..count];
            let old: Vec<i32> = list
                .splice(at..at + count, replacement.iter().copied())
                .collect();
            ContainerEvent::replace(old, replacement.to_vec(), Some(at))
        }
        ListOp::Move { from, to, count } => {
            let from = from % len;
            let count = (*count).min(len - from);
            let moved: Vec<i32> = list.drain(from..from + count).collect();
            let to = to % (list.len() + 1);
            list.splice(to..to, moved.iter().copied());
            ContainerEvent::moved(moved, from, to)
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SetOp {
    Insert(i32),
    Remove(i32),
    Replace(i32, i32),
}

pub(crate) fn set_op_strategy() -> impl Strategy<Value = SetOp> {
    prop_oneof![
        (0i32..20).prop_map(SetOp::Insert),
        (0i32..20).prop_map(SetOp::Remove),
        (0i32..20, 0i32..20).prop_map(|(old, new)| SetOp::Replace(old, new)),
    ]
}

/// Apply `op` when it changes the set, returning the matching notification
pub(crate) fn apply_set_op(set: &mut HashSet<i32>, op: &SetOp) -> Option<ContainerEvent<i32>> {
    match *op {
        SetOp::Insert(item) => set
            .insert(item)
            .then(|| ContainerEvent::add(vec![item], None)),
        SetOp::Remove(item) => set
            .remove(&item)
            .then(|| ContainerEvent::remove(vec![item], None)),
        SetOp::Replace(old, new) => {
            if old == new || !set.contains(&old) || set.contains(&new) {
                return None;
            }
            set.remove(&old);
            set.insert(new);
            Some(ContainerEvent::replace(vec![old], vec![new], None))
        }
    }
}
