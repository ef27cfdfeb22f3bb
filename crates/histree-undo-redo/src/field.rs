//! Field access capability for trackable objects
//!
//! A trackable type publishes a [`FieldTable`] listing the fields the
//! tracker may snapshot and restore. Names are resolved to [`FieldId`]s once,
//! when the mutator is wired up, so capture and replay never look fields up
//! by string.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, UndoRedoError};

/// Index of a field inside its owner's [`FieldTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) usize);

impl FieldId {
    /// Position of the field in its table
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An object whose fields can be read and written by id.
///
/// Changes hold owners only through `Weak<dyn FieldOwner<V>>`, so
/// implementations need interior mutability.
pub trait FieldOwner<V>: Send + Sync {
    /// Current value of a field
    fn read_field(&self, field: FieldId) -> Result<V>;

    /// Overwrite a field
    fn write_field(&self, field: FieldId, value: V) -> Result<()>;

    /// Human-readable field name, for diagnostics
    fn field_name(&self, field: FieldId) -> Option<&str>;
}

struct FieldAccessor<T, V> {
    name: &'static str,
    get: fn(&T) -> V,
    set: fn(&mut T, V),
}

/// Typed getter/setter table for one trackable type
pub struct FieldTable<T, V> {
    fields: Vec<FieldAccessor<T, V>>,
}

impl<T, V> FieldTable<T, V> {
    /// Create an empty table
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Register a field
    pub fn field(mut self, name: &'static str, get: fn(&T) -> V, set: fn(&mut T, V)) -> Self {
        self.fields.push(FieldAccessor { name, get, set });
        self
    }

    /// Resolve a field name to its id
    pub fn id_of(&self, name: &str) -> Result<FieldId> {
        self.fields
            .iter()
            .position(|accessor| accessor.name == name)
            .map(FieldId)
            .ok_or_else(|| UndoRedoError::field_not_found(name))
    }

    /// Name of a field id
    pub fn name_of(&self, field: FieldId) -> Option<&'static str> {
        self.fields.get(field.0).map(|accessor| accessor.name)
    }

    /// Number of registered fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are registered
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn accessor(&self, field: FieldId) -> Result<&FieldAccessor<T, V>> {
        self.fields
            .get(field.0)
            .ok_or_else(|| UndoRedoError::field_not_found(field.to_string()))
    }
}

impl<T, V> Default for FieldTable<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// A value of type `T` paired with the field table the tracker uses on it
pub struct TrackedObject<T, V> {
    value: RwLock<T>,
    table: Arc<FieldTable<T, V>>,
}

impl<T, V> TrackedObject<T, V> {
    /// Wrap a value with its field table
    pub fn new(value: T, table: Arc<FieldTable<T, V>>) -> Self {
        Self {
            value: RwLock::new(value),
            table,
        }
    }

    /// Wrap a value and return it ready for sharing
    pub fn shared(value: T, table: Arc<FieldTable<T, V>>) -> Arc<Self> {
        Arc::new(Self::new(value, table))
    }

    /// The field table
    pub fn table(&self) -> &FieldTable<T, V> {
        &self.table
    }

    /// Resolve a field name through the table
    pub fn field(&self, name: &str) -> Result<FieldId> {
        self.table.id_of(name)
    }

    /// Run a closure against the current value
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.read())
    }

    /// Clone the current value
    pub fn snapshot(&self) -> T
    where
        T: Clone,
    {
        self.value.read().clone()
    }
}

impl<T, V> FieldOwner<V> for TrackedObject<T, V>
where
    T: Send + Sync,
    V: Send + Sync,
{
    fn read_field(&self, field: FieldId) -> Result<V> {
        let accessor = self.table.accessor(field)?;
        Ok((accessor.get)(&self.value.read()))
    }

    fn write_field(&self, field: FieldId, value: V) -> Result<()> {
        let accessor = self.table.accessor(field)?;
        (accessor.set)(&mut self.value.write(), value);
        Ok(())
    }

    fn field_name(&self, field: FieldId) -> Option<&str> {
        self.table.name_of(field)
    }
}

impl<T: fmt::Debug, V> fmt::Debug for TrackedObject<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedObject")
            .field("value", &*self.value.read())
            .field("fields", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    fn point_table() -> Arc<FieldTable<Point, i64>> {
        Arc::new(
            FieldTable::new()
                .field("x", |p: &Point| p.x, |p: &mut Point, v| p.x = v)
                .field("y", |p: &Point| p.y, |p: &mut Point, v| p.y = v),
        )
    }

    #[test]
    fn test_resolve_and_access() {
        let point = TrackedObject::new(Point { x: 1, y: 2 }, point_table());
        let y = point.field("y").unwrap();
        assert_eq!(y.index(), 1);
        assert_eq!(point.read_field(y).unwrap(), 2);
        point.write_field(y, 9).unwrap();
        assert_eq!(point.snapshot(), Point { x: 1, y: 9 });
        assert_eq!(point.field_name(y), Some("y"));
    }

    #[test]
    fn test_unknown_field() {
        let point = TrackedObject::new(Point { x: 0, y: 0 }, point_table());
        assert!(matches!(point.field("z"), Err(UndoRedoError::FieldNotFound(_))));
        assert!(point.read_field(FieldId(7)).is_err());
        assert!(point.write_field(FieldId(7), 1).is_err());
    }
}
