//! Table handles and the per-table entry cache.
//!
//! One [`Table`] exists per table name per database: handles are cheap
//! clones sharing the same inner state, so two lookups of the same name
//! observe the same cache. The entry cache maps primary-key tuples to
//! cache-owned row slots and guarantees at most one live slot per key.
//!
//! Every mutation of the cache map happens under the table-scoped `entries`
//! mutex, and any flush that precedes an eviction happens under the same
//! guard — the reaper, handle release, `delete`, and `flush` all serialize
//! there. Lock order is always `entries` → connection; no path acquires them
//! the other way around.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use rusqlite::Connection;

use crate::cache::entry::{Entry, RowSlot};
use crate::connection::{ConnectionManager, execution_error, query_all};
use crate::database::DatabaseCore;
use crate::links::LinkRegistry;
use crate::models::{ColumnInfo, PrimaryKey, ReferentialAction, TableSchema, Value};
use crate::{Error, Result};

/// Shared per-table state. Owned by the database's table map; external
/// holders share it through [`Table`] clones.
#[derive(Debug)]
pub(crate) struct TableInner {
    pub(crate) name: String,
    pub(crate) conn: Arc<ConnectionManager>,
    pub(crate) registry: Arc<LinkRegistry>,
    pub(crate) core: Weak<DatabaseCore>,
    schema: Mutex<TableSchema>,
    entries: Mutex<HashMap<PrimaryKey, Arc<RowSlot>>>,
}

/// Handle to one table: schema metadata, links, and the row cache.
///
/// Cloning is cheap and preserves identity — all clones share the cache.
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) inner: Arc<TableInner>,
}

impl Table {
    /// Loads a handle for an existing table, reading its schema from the
    /// engine.
    pub(crate) fn load(
        name: String,
        conn: Arc<ConnectionManager>,
        registry: Arc<LinkRegistry>,
        core: Weak<DatabaseCore>,
    ) -> Result<Self> {
        let rows = conn.table_info(&name)?;
        if rows.is_empty() {
            return Err(Error::TableNotFound(name));
        }
        let schema = TableSchema::from_pragma_rows(&name, &rows)?;
        Ok(Self {
            inner: Arc::new(TableInner {
                name,
                conn,
                registry,
                core,
                schema: Mutex::new(schema),
                entries: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<TableInner>) -> Self {
        Self { inner }
    }

    /// The table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Column metadata, in declaration order.
    #[must_use]
    pub fn columns(&self) -> Vec<ColumnInfo> {
        self.schema_snapshot().columns().to_vec()
    }

    /// Primary-key column names, in key order.
    #[must_use]
    pub fn primary_keys(&self) -> Vec<String> {
        self.schema_snapshot()
            .primary_keys()
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Number of rows currently held in the entry cache.
    #[must_use]
    pub fn cached_rows(&self) -> usize {
        self.lock_entries().len()
    }

    /// Fetches the row matching the primary-key filter.
    ///
    /// The filter must provide a value for every key column and nothing
    /// else. A cached entry is returned as-is — identity-preserving, no
    /// store round-trip; otherwise the row is queried, materialized, and
    /// cached. `None` when no such row exists.
    pub fn get_row(&self, filter: &[(&str, Value)]) -> Result<Option<Entry>> {
        self.ensure_open("get_row")?;
        let schema = self.schema_snapshot();
        let key = key_from_filter(&self.inner.name, &schema, filter)?;

        let slot = {
            let mut map = self.lock_entries();
            if let Some(slot) = map.get(&key) {
                metrics::counter!("row_cache_hits_total", "table" => self.inner.name.clone())
                    .increment(1);
                slot.acquire();
                Some(Arc::clone(slot))
            } else {
                metrics::counter!("row_cache_misses_total", "table" => self.inner.name.clone())
                    .increment(1);
                let key_names = effective_key_names(&schema);
                let sql = format!(
                    "SELECT * FROM {} WHERE {}",
                    self.inner.name,
                    key_predicate(&key_names)
                );
                let rows = self.inner.conn.query(&sql, key.values())?;
                rows.into_iter().next().map(|row| {
                    let slot = Arc::new(RowSlot::new(key.clone(), row));
                    slot.acquire();
                    map.insert(key, Arc::clone(&slot));
                    slot
                })
            }
        };
        Ok(slot.map(|slot| self.entry_for(slot)))
    }

    /// Inserts a row and returns its cached entry.
    ///
    /// The stored row is read back after the insert so SQL defaults and
    /// AUTOINCREMENT key values are reflected in the entry.
    pub fn add(&self, fields: &[(&str, Value)]) -> Result<Entry> {
        self.ensure_open("add")?;
        let schema = self.schema_snapshot();
        for (name, _) in fields {
            if !schema.has_column(name) {
                return Err(Error::ColumnNotFound {
                    table: self.inner.name.clone(),
                    column: (*name).to_string(),
                });
            }
        }
        if fields.is_empty() {
            return Err(Error::InvalidInput(format!(
                "add to '{}' requires at least one field",
                self.inner.name
            )));
        }

        let columns: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
        let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("?{i}")).collect();
        let params: Vec<Value> = fields.iter().map(|(_, value)| value.clone()).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.inner.name,
            columns.join(", "),
            placeholders.join(", ")
        );
        let read_back_sql = format!("SELECT * FROM {} WHERE rowid = ?1", self.inner.name);

        // Insert and read back under one lock acquisition so the rowid is ours.
        let stored = self.inner.conn.with_connection("add", |conn| {
            conn.execute(&insert_sql, rusqlite::params_from_iter(params.iter()))
                .map_err(|e| execution_error("add", &insert_sql, &e))?;
            let rowid = conn.last_insert_rowid();
            let rows = query_all(conn, &read_back_sql, &[Value::Integer(rowid)])?;
            Ok(rows.into_iter().next())
        })?;

        let values = stored.unwrap_or_else(|| row_from_fields(&schema, fields));
        let key = key_from_row(&schema, &values);
        let slot = {
            let mut map = self.lock_entries();
            if let Some(existing) = map.get(&key) {
                existing.refresh_clean(&values);
                existing.acquire();
                Arc::clone(existing)
            } else {
                let slot = Arc::new(RowSlot::new(key.clone(), values));
                slot.acquire();
                map.insert(key, Arc::clone(&slot));
                slot
            }
        };
        Ok(self.entry_for(slot))
    }

    /// Reads rows matching the options, in engine order.
    ///
    /// Filtering, ordering, and pagination are delegated verbatim to SQLite;
    /// nothing is re-sorted in memory. Rows materialize through the cache:
    /// an already-cached entry is reused, its clean fields refreshed from
    /// the store and its dirty edits preserved.
    pub fn select(&self, options: &crate::models::SelectOptions) -> Result<Vec<Entry>> {
        self.ensure_open("select")?;
        let schema = self.schema_snapshot();
        let sql = format!(
            "SELECT * FROM {}{}",
            self.inner.name,
            options.render_suffix()
        );
        let rows = self.inner.conn.query(&sql, &[])?;
        self.materialize_rows(&schema, rows)
    }

    /// Reads every row of the table, in engine order.
    pub fn get_all(&self) -> Result<Vec<Entry>> {
        self.select(&crate::models::SelectOptions::new())
    }

    /// Upserts keyed by the primary key.
    ///
    /// An existing row's entry is updated in memory and flushed; a missing
    /// row is inserted via [`Table::add`].
    pub fn update_or_add(&self, fields: &[(&str, Value)]) -> Result<Entry> {
        self.ensure_open("update_or_add")?;
        let schema = self.schema_snapshot();
        let key_names = effective_key_names(&schema);

        let mut filter = Vec::with_capacity(key_names.len());
        for key in &key_names {
            let value = fields
                .iter()
                .find(|(name, _)| *name == key.as_str())
                .map(|(_, value)| value.clone())
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "update_or_add on '{}' requires a value for key column '{key}'",
                        self.inner.name
                    ))
                })?;
            filter.push((key.as_str(), value));
        }

        if let Some(entry) = self.get_row(&filter)? {
            for (name, value) in fields {
                if !key_names.iter().any(|key| key.as_str() == *name) {
                    entry.set(name, value.clone())?;
                }
            }
            entry.flush()?;
            return Ok(entry);
        }
        self.add(fields)
    }

    /// Deletes the row matching the primary-key filter.
    ///
    /// The cached entry is evicted with its unflushed edits discarded —
    /// deletion wins over pending writes — and links with CASCADE on-delete
    /// propagate to their source tables recursively. Returns whether a row
    /// was deleted.
    pub fn delete(&self, filter: &[(&str, Value)]) -> Result<bool> {
        self.ensure_open("delete")?;
        let schema = self.schema_snapshot();
        let key = key_from_filter(&self.inner.name, &schema, filter)?;
        let key_names = effective_key_names(&schema);

        let cascades: Vec<_> = self
            .inner
            .registry
            .incoming(&self.inner.name)
            .into_iter()
            .filter(|link| link.on_delete == ReferentialAction::Cascade)
            .collect();

        let (had_slot, affected, cascade_row) = {
            let mut map = self.lock_entries();

            // Cascade matching uses the persisted row: source rows in the
            // store reference stored key values, not unflushed edits.
            let cascade_row = if cascades.is_empty() {
                None
            } else {
                let sql = format!(
                    "SELECT * FROM {} WHERE {}",
                    self.inner.name,
                    key_predicate(&key_names)
                );
                self.inner.conn.query(&sql, key.values())?.into_iter().next()
            };

            let slot = map.remove(&key);
            let had_slot = slot.is_some();
            if let Some(slot) = slot {
                slot.mark_defunct();
                metrics::counter!("row_cache_evictions_total", "table" => self.inner.name.clone())
                    .increment(1);
            }

            let delete_sql = format!(
                "DELETE FROM {} WHERE {}",
                self.inner.name,
                key_predicate(&key_names)
            );
            let affected = self.inner.conn.execute(&delete_sql, key.values())?;
            (had_slot, affected, cascade_row)
        };

        if affected == 0 && !had_slot {
            return Ok(false);
        }

        if let Some(row) = cascade_row {
            let core = self.ensure_open("delete")?;
            for link in cascades {
                let Some(index) = schema.column_index(&link.target_key) else {
                    tracing::warn!(
                        table = %self.inner.name,
                        column = %link.target_key,
                        "cascade link references an unknown column, skipping"
                    );
                    continue;
                };
                let value = row.get(index).cloned().unwrap_or(Value::Null);
                let source = match core.table_handle(&link.source_table) {
                    Ok(table) => table,
                    Err(Error::TableNotFound(_)) => continue,
                    Err(error) => return Err(error),
                };
                source.cascade_from(&link.source_key, &value)?;
            }
        }
        Ok(affected > 0)
    }

    /// Persists every dirty cached entry in one batch and clears the dirty
    /// flags. Entries stay cached.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open("flush")?;
        self.flush_all()
    }

    /// Re-reads column metadata from the engine after a migration.
    ///
    /// Cached slots are realigned by column name so surviving values and
    /// dirty flags follow their columns to the new positions.
    pub fn update_schema(&self) -> Result<()> {
        self.ensure_open("update_schema")?;
        let rows = self.inner.conn.table_info(&self.inner.name)?;
        if rows.is_empty() {
            return Err(Error::TableNotFound(self.inner.name.clone()));
        }
        let new_schema = TableSchema::from_pragma_rows(&self.inner.name, &rows)?;

        let map = self.lock_entries();
        let old_schema = {
            let mut schema = self.lock_schema();
            let old = schema.clone();
            *schema = new_schema.clone();
            old
        };
        for slot in map.values() {
            slot.remap(&old_schema, &new_schema);
        }
        drop(map);
        tracing::debug!(table = %self.inner.name, "schema reloaded");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internal machinery
    // ------------------------------------------------------------------

    /// Checks the owning database is alive and open.
    pub(crate) fn ensure_open(&self, operation: &str) -> Result<Arc<DatabaseCore>> {
        let Some(core) = self.inner.core.upgrade() else {
            return Err(Error::Closed {
                operation: operation.to_string(),
            });
        };
        if core.is_closed() {
            return Err(Error::Closed {
                operation: operation.to_string(),
            });
        }
        Ok(core)
    }

    pub(crate) fn schema_snapshot(&self) -> TableSchema {
        self.lock_schema().clone()
    }

    fn lock_schema(&self) -> MutexGuard<'_, TableSchema> {
        match self.inner.schema.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(table = %self.inner.name, "schema mutex was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<PrimaryKey, Arc<RowSlot>>> {
        match self.inner.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(table = %self.inner.name, "entry cache mutex was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    fn entry_for(&self, slot: Arc<RowSlot>) -> Entry {
        Entry {
            slot,
            table: self.clone(),
        }
    }

    /// Materializes query rows through the cache, preserving engine order.
    ///
    /// Entry handles are only constructed after the cache lock is released;
    /// dropping a handle re-enters the cache lock.
    fn materialize_rows(&self, schema: &TableSchema, rows: Vec<Vec<Value>>) -> Result<Vec<Entry>> {
        let mut slots = Vec::with_capacity(rows.len());
        {
            let mut map = self.lock_entries();
            for row in rows {
                let key = key_from_row(schema, &row);
                if let Some(existing) = map.get(&key) {
                    existing.refresh_clean(&row);
                    existing.acquire();
                    slots.push(Arc::clone(existing));
                } else {
                    let slot = Arc::new(RowSlot::new(key.clone(), row));
                    slot.acquire();
                    map.insert(key, Arc::clone(&slot));
                    slots.push(slot);
                }
            }
        }
        Ok(slots.into_iter().map(|slot| self.entry_for(slot)).collect())
    }

    /// Reads rows where `column = value`, materialized through the cache.
    pub(crate) fn select_where_eq(&self, column: &str, value: &Value) -> Result<Vec<Entry>> {
        let schema = self.schema_snapshot();
        if !schema.has_column(column) {
            return Err(Error::ColumnNotFound {
                table: self.inner.name.clone(),
                column: column.to_string(),
            });
        }
        let sql = format!("SELECT * FROM {} WHERE {column} = ?1", self.inner.name);
        let rows = self.inner.conn.query(&sql, std::slice::from_ref(value))?;
        self.materialize_rows(&schema, rows)
    }

    /// Deletes every row whose `column` equals `value`, cascading further.
    pub(crate) fn cascade_from(&self, column: &str, value: &Value) -> Result<()> {
        let schema = self.schema_snapshot();
        if !schema.has_column(column) {
            return Err(Error::ColumnNotFound {
                table: self.inner.name.clone(),
                column: column.to_string(),
            });
        }
        let key_names = effective_key_names(&schema);
        let sql = format!("SELECT * FROM {} WHERE {column} = ?1", self.inner.name);
        let rows = self.inner.conn.query(&sql, std::slice::from_ref(value))?;

        for row in rows {
            let key = key_from_row(&schema, &row);
            let filter: Vec<(&str, Value)> = key_names
                .iter()
                .map(String::as_str)
                .zip(key.values().iter().cloned())
                .collect();
            self.delete(&filter)?;
        }
        Ok(())
    }

    /// Resolves entries related to `slot` through a declared link.
    pub(crate) fn related_for(&self, slot: &Arc<RowSlot>, other: &str) -> Result<Vec<Entry>> {
        let core = self.ensure_open("related")?;
        let name = &self.inner.name;

        if let Some(link) = self.inner.registry.link_between(name, other) {
            // Forward: this table holds the reference, follow it to the target.
            let schema = self.schema_snapshot();
            let index =
                schema
                    .column_index(&link.source_key)
                    .ok_or_else(|| Error::ColumnNotFound {
                        table: name.clone(),
                        column: link.source_key.clone(),
                    })?;
            let value = slot.value_at(index).unwrap_or(Value::Null);
            let target = core.table_handle(other)?;
            let target_schema = target.schema_snapshot();
            let target_keys = effective_key_names(&target_schema);
            if target_keys.len() == 1 && target_keys[0] == link.target_key {
                return Ok(target
                    .get_row(&[(link.target_key.as_str(), value)])?
                    .into_iter()
                    .collect());
            }
            return target.select_where_eq(&link.target_key, &value);
        }

        if let Some(link) = self.inner.registry.link_between(other, name) {
            // Reverse: enumerate source rows pointing at this row.
            let schema = self.schema_snapshot();
            let index =
                schema
                    .column_index(&link.target_key)
                    .ok_or_else(|| Error::ColumnNotFound {
                        table: name.clone(),
                        column: link.target_key.clone(),
                    })?;
            let value = slot.value_at(index).unwrap_or(Value::Null);
            let source = core.table_handle(other)?;
            return source.select_where_eq(&link.source_key, &value);
        }

        Err(Error::InvalidInput(format!(
            "no link declared between '{name}' and '{other}'"
        )))
    }

    /// Flushes one slot through the serialized connection.
    pub(crate) fn flush_slot(&self, slot: &Arc<RowSlot>) -> Result<()> {
        let schema = self.schema_snapshot();
        self.inner.conn.with_connection("flush_entry", |conn| {
            flush_slot_on(conn, &self.inner.name, &schema, slot)
        })
    }

    /// Flushes every dirty cached entry under one lock acquisition.
    pub(crate) fn flush_all(&self) -> Result<()> {
        let schema = self.schema_snapshot();
        let map = self.lock_entries();
        let dirty: Vec<Arc<RowSlot>> = map.values().filter(|s| s.is_dirty()).cloned().collect();
        if dirty.is_empty() {
            return Ok(());
        }
        let result = self.inner.conn.with_connection("flush", |conn| {
            for slot in &dirty {
                flush_slot_on(conn, &self.inner.name, &schema, slot)?;
            }
            Ok(())
        });
        drop(map);
        if result.is_ok() {
            metrics::counter!("row_cache_flushes_total", "table" => self.inner.name.clone())
                .increment(dirty.len() as u64);
        }
        result
    }

    /// End-of-life for an entry handle.
    ///
    /// When the dropping handle is the last one outside the cache, dirty
    /// state is flushed before the slot becomes unreachable to callers. The
    /// entry cache lock serializes the count transition against the reaper.
    pub(crate) fn release_slot(&self, slot: &Arc<RowSlot>) {
        let Some(core) = self.inner.core.upgrade() else {
            slot.release();
            return;
        };
        if slot.is_defunct() || core.is_closed() {
            if !slot.is_defunct() && slot.is_dirty() {
                tracing::debug!(
                    table = %self.inner.name,
                    "entry released after close, discarding edits"
                );
            }
            slot.release();
            return;
        }

        let map = self.lock_entries();
        let remaining = slot.release();
        if remaining == 0 && slot.is_dirty() {
            if let Err(error) = self.flush_slot(slot) {
                tracing::error!(
                    table = %self.inner.name,
                    %error,
                    "flush on entry release failed"
                );
            } else {
                metrics::counter!(
                    "row_cache_release_flushes_total",
                    "table" => self.inner.name.clone()
                )
                .increment(1);
            }
        }
        drop(map);
    }

    /// One reaper pass over the entry cache: flush and evict slots with no
    /// external referrers. Returns `(flushed, evicted)`.
    ///
    /// A slot whose flush fails stays cached and dirty; it is retried on the
    /// next sweep rather than silently dropped.
    pub(crate) fn sweep_entries(&self) -> (usize, usize) {
        let schema = self.schema_snapshot();
        let mut map = self.lock_entries();
        let unreferenced: Vec<PrimaryKey> = map
            .iter()
            .filter(|(_, slot)| slot.borrow_count() == 0)
            .map(|(key, _)| key.clone())
            .collect();

        let mut flushed = 0;
        let mut evicted = 0;
        for key in unreferenced {
            let Some(slot) = map.get(&key) else { continue };
            if slot.is_dirty() {
                let result = self.inner.conn.with_connection("reap_flush", |conn| {
                    flush_slot_on(conn, &self.inner.name, &schema, slot)
                });
                match result {
                    Ok(()) => flushed += 1,
                    Err(error) => {
                        tracing::warn!(
                            table = %self.inner.name,
                            %error,
                            "reaper flush failed, keeping entry for retry"
                        );
                        continue;
                    },
                }
            }
            map.remove(&key);
            evicted += 1;
        }
        if evicted > 0 {
            metrics::counter!("row_cache_evictions_total", "table" => self.inner.name.clone())
                .increment(evicted as u64);
        }
        metrics::gauge!("row_cache_entries", "table" => self.inner.name.clone())
            .set(f64::from(u32::try_from(map.len()).unwrap_or(u32::MAX)));
        (flushed, evicted)
    }

    /// Flushes everything and empties the cache. Used at database close.
    ///
    /// Slots are marked defunct after the flush so late handle drops do not
    /// write again.
    pub(crate) fn close_flush(&self) -> Result<()> {
        let schema = self.schema_snapshot();
        let map = self.lock_entries();
        let dirty: Vec<Arc<RowSlot>> = map
            .values()
            .filter(|slot| slot.is_dirty())
            .cloned()
            .collect();
        let result = if dirty.is_empty() {
            Ok(())
        } else {
            self.inner.conn.with_connection("close_flush", |conn| {
                for slot in &dirty {
                    flush_slot_on(conn, &self.inner.name, &schema, slot)?;
                }
                Ok(())
            })
        };
        self.discard_locked(map);
        result
    }

    /// Discards every cached entry without flushing. Used by `drop_table`:
    /// the rows no longer exist.
    pub(crate) fn discard_all(&self) {
        let map = self.lock_entries();
        self.discard_locked(map);
    }

    fn discard_locked(&self, mut map: MutexGuard<'_, HashMap<PrimaryKey, Arc<RowSlot>>>) {
        for slot in map.values() {
            slot.mark_defunct();
        }
        map.clear();
    }
}

/// Writes one slot's dirty fields as a single UPDATE on an already-locked
/// connection, clearing the dirty set on success.
///
/// The slot's state stays locked for the duration so a concurrent edit
/// cannot be lost between snapshot and clear.
fn flush_slot_on(
    conn: &Connection,
    table: &str,
    schema: &TableSchema,
    slot: &Arc<RowSlot>,
) -> Result<()> {
    let mut state = slot.lock_state();
    if state.defunct || state.dirty.is_empty() {
        return Ok(());
    }

    let columns = schema.columns();
    let mut assignments = Vec::with_capacity(state.dirty.len());
    let mut params = Vec::with_capacity(state.dirty.len() + slot.key().values().len());
    for index in &state.dirty {
        let Some(column) = columns.get(*index) else {
            continue;
        };
        params.push(state.values.get(*index).cloned().unwrap_or(Value::Null));
        assignments.push(format!("{} = ?{}", column.name, params.len()));
    }
    if assignments.is_empty() {
        state.dirty.clear();
        return Ok(());
    }

    let key_names = effective_key_names(schema);
    let mut conditions = Vec::with_capacity(key_names.len());
    for (name, value) in key_names.iter().zip(slot.key().values()) {
        params.push(value.clone());
        conditions.push(format!("{name} = ?{}", params.len()));
    }

    let sql = format!(
        "UPDATE {table} SET {} WHERE {}",
        assignments.join(", "),
        conditions.join(" AND ")
    );
    conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
        .map_err(|e| execution_error("flush", &sql, &e))?;
    state.dirty.clear();
    Ok(())
}

/// Key column positions: the declared primary key, or the first column for
/// tables that never declared one.
fn effective_key_indices(schema: &TableSchema) -> Vec<usize> {
    let indices = schema.primary_key_indices();
    if indices.is_empty() && schema.width() > 0 {
        vec![0]
    } else {
        indices
    }
}

/// Key column names matching [`effective_key_indices`].
fn effective_key_names(schema: &TableSchema) -> Vec<String> {
    effective_key_indices(schema)
        .into_iter()
        .filter_map(|i| schema.columns().get(i).map(|c| c.name.clone()))
        .collect()
}

fn key_predicate(key_names: &[String]) -> String {
    key_names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{name} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Extracts the key tuple from a full row.
fn key_from_row(schema: &TableSchema, row: &[Value]) -> PrimaryKey {
    PrimaryKey::new(
        effective_key_indices(schema)
            .into_iter()
            .map(|i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect(),
    )
}

/// Builds the key tuple from a caller-supplied filter.
///
/// The filter must name every key column, and only key columns.
fn key_from_filter(
    table: &str,
    schema: &TableSchema,
    filter: &[(&str, Value)],
) -> Result<PrimaryKey> {
    for (name, _) in filter {
        if !schema.has_column(name) {
            return Err(Error::ColumnNotFound {
                table: table.to_string(),
                column: (*name).to_string(),
            });
        }
    }

    let key_names = effective_key_names(schema);
    for (name, _) in filter {
        if !key_names.iter().any(|key| key.as_str() == *name) {
            return Err(Error::InvalidInput(format!(
                "filter column '{name}' is not part of the key of '{table}'"
            )));
        }
    }

    let mut values = Vec::with_capacity(key_names.len());
    for key in &key_names {
        let value = filter
            .iter()
            .find(|(name, _)| *name == key.as_str())
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "filter for '{table}' is missing key column '{key}'"
                ))
            })?;
        values.push(value);
    }
    Ok(PrimaryKey::new(values))
}

/// Builds a row aligned to the schema from provided fields, NULL elsewhere.
fn row_from_fields(schema: &TableSchema, fields: &[(&str, Value)]) -> Vec<Value> {
    schema
        .columns()
        .iter()
        .map(|column| {
            fields
                .iter()
                .find(|(name, _)| *name == column.name)
                .map_or(Value::Null, |(_, value)| value.clone())
        })
        .collect()
}
