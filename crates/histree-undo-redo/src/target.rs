//! Container capabilities
//!
//! Tracked containers declare up front whether they are order-preserving
//! ([`SequenceTarget`]) or unordered ([`SetTarget`]). Both are used through
//! `Weak<dyn …>` handles, so every operation takes `&self`.

use std::collections::HashSet;
use std::hash::Hash;

use parking_lot::RwLock;

/// An order-preserving container
pub trait SequenceTarget<V>: Send + Sync {
    /// Number of items
    fn len(&self) -> usize;

    /// Whether the container is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Item at `index`
    fn get(&self, index: usize) -> Option<V>;

    /// Insert at `index` (`index <= len`)
    fn insert(&self, index: usize, item: V);

    /// Remove and return the item at `index`
    fn remove_at(&self, index: usize) -> Option<V>;

    /// Overwrite the item at `index`, returning the previous item
    fn set(&self, index: usize, item: V) -> Option<V>;

    /// Append at the end
    fn push(&self, item: V);

    /// Index of the first item equal to `item`
    fn position_of(&self, item: &V) -> Option<usize>;

    /// Remove everything
    fn clear(&self);

    /// Copy of the full contents in order
    fn snapshot(&self) -> Vec<V>;
}

/// An unordered container without duplicates
pub trait SetTarget<V>: Send + Sync {
    /// Number of items
    fn len(&self) -> usize;

    /// Whether the container is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership test
    fn contains(&self, item: &V) -> bool;

    /// Add an item; `false` if already present
    fn insert(&self, item: V) -> bool;

    /// Remove an item; `false` if absent
    fn remove(&self, item: &V) -> bool;

    /// Remove everything
    fn clear(&self);

    /// Copy of the full contents
    fn snapshot(&self) -> Vec<V>;
}

impl<V> SequenceTarget<V> for RwLock<Vec<V>>
where
    V: Clone + PartialEq + Send + Sync,
{
    fn len(&self) -> usize {
        self.read().len()
    }

    fn get(&self, index: usize) -> Option<V> {
        self.read().get(index).cloned()
    }

    fn insert(&self, index: usize, item: V) {
        self.write().insert(index, item);
    }

    fn remove_at(&self, index: usize) -> Option<V> {
        let mut items = self.write();
        (index < items.len()).then(|| items.remove(index))
    }

    fn set(&self, index: usize, item: V) -> Option<V> {
        self.write()
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, item))
    }

    fn push(&self, item: V) {
        self.write().push(item);
    }

    fn position_of(&self, item: &V) -> Option<usize> {
        self.read().iter().position(|candidate| candidate == item)
    }

    fn clear(&self) {
        self.write().clear();
    }

    fn snapshot(&self) -> Vec<V> {
        self.read().clone()
    }
}

impl<V> SetTarget<V> for RwLock<HashSet<V>>
where
    V: Clone + Eq + Hash + Send + Sync,
{
    fn len(&self) -> usize {
        self.read().len()
    }

    fn contains(&self, item: &V) -> bool {
        self.read().contains(item)
    }

    fn insert(&self, item: V) -> bool {
        self.write().insert(item)
    }

    fn remove(&self, item: &V) -> bool {
        self.write().remove(item)
    }

    fn clear(&self) {
        self.write().clear();
    }

    fn snapshot(&self) -> Vec<V> {
        self.read().iter().cloned().collect()
    }
}
