//! Property-based tests for undo/redo round trip
//!
//! For any sequence of recorded changesets, undoing all of them restores the
//! starting state and redoing all of them restores the final state, whether
//! or not the changesets were merged on commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use histree_undo_redo::{
    ChangeTracker, ContainerEvent, FieldTable, NodeId, TrackedObject, TrackerConfig,
};
use parking_lot::RwLock;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum ListOp {
    Insert(usize, u8),
    Remove(usize),
    Replace(usize, u8),
    Move(usize, usize),
    Clear,
}

fn arb_list_op() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        4 => (any::<usize>(), 0u8..8).prop_map(|(at, item)| ListOp::Insert(at, item)),
        3 => any::<usize>().prop_map(ListOp::Remove),
        2 => (any::<usize>(), 0u8..8).prop_map(|(at, item)| ListOp::Replace(at, item)),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(from, to)| ListOp::Move(from, to)),
        1 => Just(ListOp::Clear),
    ]
}

/// Apply `op` the way an observable list would: mutate, then notify
fn apply(tracker: &ChangeTracker<u8>, list: &Arc<RwLock<Vec<u8>>>, op: &ListOp) {
    let len = list.read().len();
    match *op {
        ListOp::Insert(at, item) => {
            let at = at % (len + 1);
            list.write().insert(at, item);
            tracker
                .sequence_changed(list, ContainerEvent::add(vec![item], Some(at)))
                .unwrap();
        }
        ListOp::Remove(_) | ListOp::Replace(..) | ListOp::Move(..) | ListOp::Clear if len == 0 => {}
        ListOp::Remove(at) => {
            let at = at % len;
            let item = list.write().remove(at);
            tracker
                .sequence_changed(list, ContainerEvent::remove(vec![item], Some(at)))
                .unwrap();
        }
        ListOp::Replace(at, item) => {
            let at = at % len;
            let old = std::mem::replace(&mut list.write()[at], item);
            tracker
                .sequence_changed(list, ContainerEvent::replace(vec![old], vec![item], Some(at)))
                .unwrap();
        }
        ListOp::Move(from, to) => {
            let from = from % len;
            let to = to % len;
            let item = {
                let mut items = list.write();
                let item = items.remove(from);
                items.insert(to, item);
                item
            };
            tracker
                .sequence_changed(list, ContainerEvent::moved(vec![item], from, to))
                .unwrap();
        }
        ListOp::Clear => {
            tracker.sequence_clearing(list).unwrap();
            list.write().clear();
        }
    }
}

#[derive(Debug, Clone)]
struct Slider {
    position: i32,
}

fn slider() -> Arc<TrackedObject<Slider, i32>> {
    let table = FieldTable::new().field(
        "position",
        |s: &Slider| s.position,
        |s: &mut Slider, v| s.position = v,
    );
    TrackedObject::shared(Slider { position: 0 }, Arc::new(table))
}

proptest! {
    /// Property: undoing every committed changeset restores the starting list,
    /// redoing every one restores the final list
    #[test]
    fn prop_list_undo_redo_round_trip(
        initial in prop::collection::vec(0u8..8, 0..10),
        batches in prop::collection::vec(prop::collection::vec(arb_list_op(), 1..8), 1..6),
        merge in any::<bool>(),
    ) {
        let tracker: ChangeTracker<u8> = ChangeTracker::new(TrackerConfig::default());
        let list = Arc::new(RwLock::new(initial.clone()));

        for batch in &batches {
            tracker.start_changeset("batch");
            for op in batch {
                apply(&tracker, &list, op);
            }
            tracker.commit(merge, false).unwrap();
        }
        let finished = list.read().clone();

        while tracker.can_undo() {
            tracker.undo().unwrap();
        }
        prop_assert_eq!(&*list.read(), &initial);

        while tracker.can_redo() {
            tracker.redo().unwrap();
        }
        prop_assert_eq!(&*list.read(), &finished);
    }

    /// Property: rollback of an open changeset leaves the list untouched
    #[test]
    fn prop_rollback_restores_list(
        initial in prop::collection::vec(0u8..8, 0..10),
        ops in prop::collection::vec(arb_list_op(), 1..12),
        merge in any::<bool>(),
    ) {
        let tracker: ChangeTracker<u8> = ChangeTracker::new(TrackerConfig::default());
        let list = Arc::new(RwLock::new(initial.clone()));

        tracker.start_changeset("attempt");
        for op in &ops {
            apply(&tracker, &list, op);
        }
        tracker.rollback(merge).unwrap();

        prop_assert_eq!(&*list.read(), &initial);
        prop_assert!(!tracker.can_undo());
    }

    /// Property: after an arbitrary mix of commits and undos, moving to any
    /// node of the tree shows the value that node was committed with
    #[test]
    fn prop_tree_navigation_reaches_every_state(
        steps in prop::collection::vec((-50i32..50, 0usize..3), 1..12),
        visits in prop::collection::vec(any::<prop::sample::Index>(), 1..12),
    ) {
        let tracker: ChangeTracker<i32> = ChangeTracker::new(TrackerConfig::default());
        let slider = slider();
        let position = slider.field("position").unwrap();

        let mut expected: HashMap<NodeId, i32> = HashMap::new();
        expected.insert(tracker.current_node(), 0);

        for (value, undos) in &steps {
            tracker.start_changeset(format!("slide to {}", value));
            tracker.set_field(&slider, position, *value).unwrap();
            tracker.commit(false, false).unwrap();
            expected.insert(tracker.current_node(), *value);

            for _ in 0..*undos {
                if tracker.can_undo() {
                    tracker.undo().unwrap();
                }
            }
            prop_assert_eq!(slider.snapshot().position, expected[&tracker.current_node()]);
        }

        let nodes: Vec<NodeId> = expected.keys().copied().collect();
        for visit in &visits {
            let node = nodes[visit.index(nodes.len())];
            tracker.move_to(node).unwrap();
            prop_assert_eq!(tracker.current_node(), node);
            prop_assert_eq!(slider.snapshot().position, expected[&node]);
        }
    }

    /// Property: merged set changesets round-trip like unmerged ones
    #[test]
    fn prop_set_undo_redo_round_trip(
        initial in prop::collection::hash_set(0u8..16, 0..8),
        ops in prop::collection::vec((any::<bool>(), 0u8..16), 1..20),
    ) {
        let tracker: ChangeTracker<u8> = ChangeTracker::new(TrackerConfig::default());
        let set = Arc::new(RwLock::new(initial.clone()));

        tracker.start_changeset("tags");
        for (insert, item) in &ops {
            let event = if *insert {
                set.write().insert(*item).then(|| ContainerEvent::add(vec![*item], None))
            } else {
                set.write().remove(item).then(|| ContainerEvent::remove(vec![*item], None))
            };
            if let Some(event) = event {
                tracker.set_changed(&set, event).unwrap();
            }
        }
        tracker.commit(true, false).unwrap();
        let finished: HashSet<u8> = set.read().clone();

        if tracker.can_undo() {
            tracker.undo().unwrap();
        }
        prop_assert_eq!(&*set.read(), &initial);
        if tracker.can_redo() {
            tracker.redo().unwrap();
        }
        prop_assert_eq!(&*set.read(), &finished);
    }
}
