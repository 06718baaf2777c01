//! Cached, mutable, write-back row entries.
//!
//! The cache owns the canonical [`RowSlot`] for each row; callers hold
//! [`Entry`] handles sharing it. Field assignment updates the in-memory value
//! and marks the field dirty — the store is untouched until `flush()` or
//! until the last external handle is released, at which point the dirty
//! fields are persisted in one statement. Shared handles observe each
//! other's unflushed writes; concurrent writers race last-write-wins at the
//! field level.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cache::table::Table;
use crate::models::{PrimaryKey, TableSchema, Value};
use crate::{Error, Result};

/// In-memory state of one cached row.
#[derive(Debug)]
pub(crate) struct RowState {
    /// Field values in schema column order.
    pub(crate) values: Vec<Value>,
    /// Positions of fields edited since the last flush.
    pub(crate) dirty: BTreeSet<usize>,
    /// Set when the row was deleted or its table dropped; a defunct slot is
    /// never flushed again.
    pub(crate) defunct: bool,
}

/// Cache-owned storage for one row, keyed by its primary-key tuple.
///
/// The key is immutable for the slot's life; everything else sits behind a
/// per-slot mutex so shared handles can mutate fields without holding any
/// table-wide lock.
///
/// `borrows` is the explicit count of external [`Entry`] handles. It goes up
/// under the table's entry-cache lock when a handle is issued (or on handle
/// clone, which is safe unlocked because the count is already nonzero) and
/// comes back down under the same lock on release — zero means only the
/// cache itself still knows the slot.
#[derive(Debug)]
pub(crate) struct RowSlot {
    key: PrimaryKey,
    borrows: AtomicUsize,
    state: Mutex<RowState>,
}

impl RowSlot {
    pub(crate) fn new(key: PrimaryKey, values: Vec<Value>) -> Self {
        Self {
            key,
            borrows: AtomicUsize::new(0),
            state: Mutex::new(RowState {
                values,
                dirty: BTreeSet::new(),
                defunct: false,
            }),
        }
    }

    pub(crate) const fn key(&self) -> &PrimaryKey {
        &self.key
    }

    /// Counts a new external handle.
    pub(crate) fn acquire(&self) {
        self.borrows.fetch_add(1, Ordering::SeqCst);
    }

    /// Releases one external handle, returning how many remain.
    pub(crate) fn release(&self) -> usize {
        self.borrows.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    /// Current number of external handles.
    pub(crate) fn borrow_count(&self) -> usize {
        self.borrows.load(Ordering::SeqCst)
    }

    /// Locks the row state, recovering from poison.
    ///
    /// A panic mid-edit leaves values structurally intact (every write is a
    /// single slot assignment), so handing out the state is safe.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, RowState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("row state mutex was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    pub(crate) fn value_at(&self, index: usize) -> Option<Value> {
        self.lock_state().values.get(index).cloned()
    }

    /// Writes a field in memory and marks it dirty.
    pub(crate) fn set_at(&self, index: usize, value: Value) {
        let mut state = self.lock_state();
        if index >= state.values.len() {
            state.values.resize(index + 1, Value::Null);
        }
        state.values[index] = value;
        state.dirty.insert(index);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        !self.lock_state().dirty.is_empty()
    }

    pub(crate) fn is_defunct(&self) -> bool {
        self.lock_state().defunct
    }

    /// Marks the slot dead; pending edits are discarded, never flushed.
    pub(crate) fn mark_defunct(&self) {
        let mut state = self.lock_state();
        state.defunct = true;
        state.dirty.clear();
    }

    /// Overwrites clean fields with freshly read values; dirty edits win.
    pub(crate) fn refresh_clean(&self, fresh: &[Value]) {
        let mut state = self.lock_state();
        for (index, value) in fresh.iter().enumerate() {
            if !state.dirty.contains(&index) {
                if index < state.values.len() {
                    state.values[index] = value.clone();
                } else {
                    state.values.push(value.clone());
                }
            }
        }
    }

    /// Realigns values and dirty positions after a schema change.
    ///
    /// Columns are matched by name: surviving columns carry their value and
    /// dirty flag to the new position, new columns start as clean NULL.
    pub(crate) fn remap(&self, old: &TableSchema, new: &TableSchema) {
        let mut state = self.lock_state();
        let mut values = vec![Value::Null; new.width()];
        let mut dirty = BTreeSet::new();
        for (new_index, column) in new.columns().iter().enumerate() {
            if let Some(old_index) = old.column_index(&column.name) {
                if let Some(value) = state.values.get(old_index) {
                    values[new_index] = value.clone();
                }
                if state.dirty.contains(&old_index) {
                    dirty.insert(new_index);
                }
            }
        }
        state.values = values;
        state.dirty = dirty;
    }
}

/// Shared handle to one cached row.
///
/// Handles are cheap to clone; all clones observe the same in-memory state.
/// Dropping the last handle outside the cache flushes any dirty fields —
/// write-back happens either explicitly through [`Entry::flush`] or
/// implicitly at end-of-life, never eagerly per assignment.
#[derive(Debug)]
pub struct Entry {
    pub(crate) slot: Arc<RowSlot>,
    pub(crate) table: Table,
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        // Safe without the cache lock: this handle keeps the count nonzero,
        // so the reaper cannot be concurrently deciding the slot is free.
        self.slot.acquire();
        Self {
            slot: Arc::clone(&self.slot),
            table: self.table.clone(),
        }
    }
}

impl Entry {
    /// Reads a field by column name.
    pub fn get(&self, column: &str) -> Result<Value> {
        let schema = self.table.schema_snapshot();
        let index = schema
            .column_index(column)
            .ok_or_else(|| Error::ColumnNotFound {
                table: self.table.name().to_string(),
                column: column.to_string(),
            })?;
        Ok(self.slot.value_at(index).unwrap_or(Value::Null))
    }

    /// Reads a field by position.
    pub fn at(&self, index: usize) -> Result<Value> {
        let schema = self.table.schema_snapshot();
        if index >= schema.width() {
            return Err(Error::ColumnOutOfRange {
                table: self.table.name().to_string(),
                index,
                width: schema.width(),
            });
        }
        Ok(self.slot.value_at(index).unwrap_or(Value::Null))
    }

    /// Writes a field in memory and marks it dirty.
    ///
    /// The store is not touched. Primary-key columns reject writes: the key
    /// identifies this slot in the cache for its whole life.
    pub fn set(&self, column: &str, value: Value) -> Result<()> {
        self.table.ensure_open("set")?;
        let schema = self.table.schema_snapshot();
        let index = schema
            .column_index(column)
            .ok_or_else(|| Error::ColumnNotFound {
                table: self.table.name().to_string(),
                column: column.to_string(),
            })?;
        if schema.primary_key_indices().contains(&index) {
            return Err(Error::InvalidInput(format!(
                "column '{column}' is part of the primary key and cannot be reassigned"
            )));
        }
        self.slot.set_at(index, value);
        Ok(())
    }

    /// Persists all dirty fields in one statement and clears the dirty set.
    ///
    /// A no-op when nothing is dirty.
    pub fn flush(&self) -> Result<()> {
        self.table.ensure_open("flush")?;
        self.table.flush_slot(&self.slot)
    }

    /// Whether any field has an unflushed edit.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.slot.is_dirty()
    }

    /// The primary-key values identifying this row, in key order.
    #[must_use]
    pub fn key(&self) -> Vec<Value> {
        self.slot.key().values().to_vec()
    }

    /// The table this entry belongs to.
    #[must_use]
    pub const fn table(&self) -> &Table {
        &self.table
    }

    /// Resolves rows related through a declared link with `table_name`.
    ///
    /// When this entry's table is the link source, the result is the single
    /// target row (empty if it does not exist). When it is the target, the
    /// result is every source row whose source key matches this row's
    /// target-key value — the reverse relation.
    pub fn related(&self, table_name: &str) -> Result<Vec<Self>> {
        self.table.related_for(&self.slot, table_name)
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.table.release_slot(&self.slot);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn slot() -> RowSlot {
        RowSlot::new(
            PrimaryKey::new(vec![Value::Integer(1)]),
            vec![Value::Integer(1), Value::Text("a".into()), Value::Null],
        )
    }

    #[test]
    fn test_set_marks_dirty() {
        let slot = slot();
        assert!(!slot.is_dirty());
        slot.set_at(1, Value::Text("b".into()));
        assert!(slot.is_dirty());
        assert_eq!(slot.value_at(1), Some(Value::Text("b".into())));
    }

    #[test]
    fn test_refresh_clean_preserves_dirty() {
        let slot = slot();
        slot.set_at(1, Value::Text("edited".into()));
        slot.refresh_clean(&[
            Value::Integer(1),
            Value::Text("stored".into()),
            Value::Integer(9),
        ]);
        // Dirty field keeps the edit, clean fields take the stored values.
        assert_eq!(slot.value_at(1), Some(Value::Text("edited".into())));
        assert_eq!(slot.value_at(2), Some(Value::Integer(9)));
    }

    #[test]
    fn test_defunct_discards_edits() {
        let slot = slot();
        slot.set_at(1, Value::Text("b".into()));
        slot.mark_defunct();
        assert!(slot.is_defunct());
        assert!(!slot.is_dirty());
    }

    #[test]
    fn test_remap_by_column_name() {
        use crate::models::Value as V;

        let old_rows = vec![
            vec![
                V::Integer(0),
                V::Text("id".into()),
                V::Text("INTEGER".into()),
                V::Integer(0),
                V::Null,
                V::Integer(1),
            ],
            vec![
                V::Integer(1),
                V::Text("name".into()),
                V::Text("TEXT".into()),
                V::Integer(0),
                V::Null,
                V::Integer(0),
            ],
        ];
        let mut new_rows = old_rows.clone();
        new_rows.push(vec![
            V::Integer(2),
            V::Text("extra".into()),
            V::Text("INTEGER".into()),
            V::Integer(0),
            V::Null,
            V::Integer(0),
        ]);
        let old = TableSchema::from_pragma_rows("t", &old_rows).unwrap();
        let new = TableSchema::from_pragma_rows("t", &new_rows).unwrap();

        let slot = RowSlot::new(
            PrimaryKey::new(vec![V::Integer(1)]),
            vec![V::Integer(1), V::Text("a".into())],
        );
        slot.set_at(1, V::Text("edited".into()));
        slot.remap(&old, &new);

        assert_eq!(slot.value_at(0), Some(V::Integer(1)));
        assert_eq!(slot.value_at(1), Some(V::Text("edited".into())));
        assert_eq!(slot.value_at(2), Some(V::Null));
        assert!(slot.is_dirty());
    }
}
