//! The database facade.
//!
//! [`Database`] is the composition root: it owns the connection manager, the
//! table map, the link registry, the version ledger, and the background
//! reaper. Tables are created and looked up here; a table handle obtained
//! twice for the same name is the same handle for as long as any external
//! reference to it survives.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::cache::{Table, TableInner};
use crate::config::DatabaseConfig;
use crate::connection::{ConnectionManager, LockStats};
use crate::gc::Reaper;
use crate::links::LinkRegistry;
use crate::migrations::{VersionLedger, is_reserved};
use crate::models::{TableSpec, Value, validate_identifier};
use crate::{Error, Result};

/// Shared state behind a database: everything the facade, the table
/// handles, and the reaper need to agree on.
#[derive(Debug)]
pub(crate) struct DatabaseCore {
    name: String,
    pub(crate) conn: Arc<ConnectionManager>,
    tables: Mutex<HashMap<String, Arc<TableInner>>>,
    pub(crate) registry: Arc<LinkRegistry>,
    ledger: VersionLedger,
    closed: AtomicBool,
    /// Weak self-reference handed to table handles so they can reach back
    /// without keeping the core alive.
    self_weak: Weak<Self>,
}

impl DatabaseCore {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    fn lock_tables(&self) -> MutexGuard<'_, HashMap<String, Arc<TableInner>>> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("table map mutex was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    /// Returns the live handle for a table, loading it from the store on
    /// first access. Identity-preserving: one inner state per name.
    pub(crate) fn table_handle(&self, name: &str) -> Result<Table> {
        self.ensure_open("get_table")?;
        let mut tables = self.lock_tables();
        if let Some(inner) = tables.get(name) {
            return Ok(Table::from_inner(Arc::clone(inner)));
        }
        if !self.conn.table_exists(name)? {
            return Err(Error::TableNotFound(name.to_string()));
        }
        let table = Table::load(
            name.to_string(),
            Arc::clone(&self.conn),
            Arc::clone(&self.registry),
            self.self_weak.clone(),
        )?;
        tables.insert(name.to_string(), Arc::clone(&table.inner));
        Ok(table)
    }

    /// One reaper pass over every live table.
    ///
    /// Unreferenced tables are flushed and dropped from the map; referenced
    /// tables get their entry caches swept instead. Flush failures keep the
    /// object cached for the next pass — eviction only follows a flush.
    pub(crate) fn sweep(&self) {
        let mut tables = self.lock_tables();
        let mut evictable = Vec::new();
        let mut entries_flushed = 0;
        let mut entries_evicted = 0;

        for (name, inner) in tables.iter() {
            if Arc::strong_count(inner) == 1 {
                evictable.push(name.clone());
            } else {
                let (flushed, evicted) = Table::from_inner(Arc::clone(inner)).sweep_entries();
                entries_flushed += flushed;
                entries_evicted += evicted;
            }
        }

        let mut tables_evicted = 0;
        for name in evictable {
            let Some(inner) = tables.get(&name) else {
                continue;
            };
            let table = Table::from_inner(Arc::clone(inner));
            match table.flush_all() {
                Ok(()) => {
                    tables.remove(&name);
                    tables_evicted += 1;
                },
                Err(error) => {
                    tracing::warn!(
                        table = %name,
                        %error,
                        "sweep flush failed, keeping table for retry"
                    );
                },
            }
        }
        drop(tables);

        metrics::counter!("reaper_sweeps_total").increment(1);
        if entries_flushed + entries_evicted + tables_evicted > 0 {
            tracing::debug!(
                database = %self.name,
                entries_flushed,
                entries_evicted,
                tables_evicted,
                "reaper sweep"
            );
        }
    }
}

/// Process-wide handle to one store.
///
/// Shared across threads behind an `Arc`; all operations take `&self`.
/// Closing (explicitly or on drop) stops the reaper, flushes every cached
/// table, and blocks further operations.
#[derive(Debug)]
pub struct Database {
    core: Arc<DatabaseCore>,
    reaper: Mutex<Option<Reaper>>,
}

impl Database {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>, config: DatabaseConfig) -> Result<Self> {
        let path = path.as_ref();
        let conn = ConnectionManager::open(path, config.lock_timeout)?;
        Self::from_manager(conn, path.display().to_string(), &config)
    }

    /// Opens an in-memory database.
    pub fn open_in_memory(config: DatabaseConfig) -> Result<Self> {
        let conn = ConnectionManager::open_in_memory(config.lock_timeout)?;
        Self::from_manager(conn, ":memory:".to_string(), &config)
    }

    fn from_manager(conn: ConnectionManager, name: String, config: &DatabaseConfig) -> Result<Self> {
        let conn = Arc::new(conn);
        let core = Arc::new_cyclic(|self_weak| DatabaseCore {
            name: name.clone(),
            conn: Arc::clone(&conn),
            tables: Mutex::new(HashMap::new()),
            registry: Arc::new(LinkRegistry::new()),
            ledger: VersionLedger::new(conn),
            closed: AtomicBool::new(false),
            self_weak: self_weak.clone(),
        });
        core.ledger.ensure_table()?;

        let reaper = if config.reaper.enabled {
            Some(Reaper::spawn(
                Arc::downgrade(&core),
                config.reaper.interval,
            ))
        } else {
            None
        };

        tracing::info!(database = %name, reaper = config.reaper.enabled, "database opened");
        Ok(Self {
            core,
            reaper: Mutex::new(reaper),
        })
    }

    /// The store identifier (path, or `:memory:`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Whether the database has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Snapshot of the connection lock contention counters.
    #[must_use]
    pub fn lock_stats(&self) -> LockStats {
        self.core.conn.lock_stats()
    }

    /// Names of the tables currently held in the table map.
    ///
    /// Diagnostics surface: lets tests observe reaper evictions.
    #[must_use]
    pub fn cached_tables(&self) -> Vec<String> {
        let tables = self.core.lock_tables();
        let mut names: Vec<String> = tables.keys().cloned().collect();
        drop(tables);
        names.sort();
        names
    }

    /// Creates a table and returns its handle.
    ///
    /// Issues `CREATE TABLE IF NOT EXISTS`, registers a version record at 0,
    /// and registers the spec's link descriptors (rejecting CASCADE cycles).
    /// Creating an already-live table returns the existing handle.
    pub fn create_table(&self, spec: &TableSpec) -> Result<Table> {
        self.core.ensure_open("create_table")?;
        if is_reserved(spec.name()) {
            return Err(Error::InvalidInput(format!(
                "table name '{}' is reserved",
                spec.name()
            )));
        }

        let ddl = spec.create_statement()?;
        self.core.registry.register(spec.name(), &spec.links)?;
        self.core.conn.execute(&ddl, &[])?;
        self.core.ledger.ensure_record(spec.name())?;

        let mut tables = self.core.lock_tables();
        if let Some(inner) = tables.get(spec.name()) {
            return Ok(Table::from_inner(Arc::clone(inner)));
        }
        let table = Table::load(
            spec.name().to_string(),
            Arc::clone(&self.core.conn),
            Arc::clone(&self.core.registry),
            Arc::downgrade(&self.core),
        )?;
        tables.insert(spec.name().to_string(), Arc::clone(&table.inner));
        drop(tables);
        tracing::info!(table = spec.name(), "table created");
        Ok(table)
    }

    /// Returns the handle for an existing table.
    ///
    /// Identity-preserving: while any external reference to the handle
    /// survives, every lookup of the same name yields the same handle.
    pub fn table(&self, name: &str) -> Result<Table> {
        self.core.table_handle(name)
    }

    /// Applies one migration step to a table.
    ///
    /// No-op when the recorded version is already ≥ `version` (idempotent
    /// against replays); fails with a sequencing error unless `version` is
    /// exactly the recorded version + 1. The statements run as one script,
    /// the version record advances, and the table handle reloads its column
    /// metadata. Migrations without explicit statements are unsupported.
    pub fn update_table(&self, name: &str, version: i64, statements: &[&str]) -> Result<()> {
        self.core.ensure_open("update_table")?;
        if is_reserved(name) {
            return Err(Error::InvalidInput(format!(
                "table name '{name}' is reserved"
            )));
        }

        let table = self.core.table_handle(name)?;
        if !self.core.ledger.gate(name, version)? {
            return Ok(());
        }
        if statements.is_empty() {
            return Err(Error::NotImplemented(
                "table migrations without an explicit statement list".to_string(),
            ));
        }

        let script: Vec<String> = statements.iter().map(|s| (*s).to_string()).collect();
        self.core.conn.batch(&script)?;
        self.core.ledger.record(name, version)?;
        table.update_schema()?;
        tracing::info!(table = name, version, "migration applied");
        Ok(())
    }

    /// Drops a table, its version record, and its cached state.
    ///
    /// Cached entries are discarded without flush — the rows no longer
    /// exist. Links touching the table are unregistered.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.core.ensure_open("drop_table")?;
        if is_reserved(name) {
            return Err(Error::InvalidInput(format!(
                "table name '{name}' is reserved"
            )));
        }
        validate_identifier(name)?;

        let mut tables = self.core.lock_tables();
        let inner = tables.remove(name);
        if inner.is_none() && !self.core.conn.table_exists(name)? {
            return Err(Error::TableNotFound(name.to_string()));
        }
        self.core.conn.execute(&format!("DROP TABLE {name}"), &[])?;
        drop(tables);

        if let Some(inner) = inner {
            Table::from_inner(inner).discard_all();
        }
        self.core.ledger.remove(name)?;
        self.core.registry.unregister_table(name);
        tracing::info!(table = name, "table dropped");
        Ok(())
    }

    /// Runs a raw read query against the store.
    ///
    /// Bypasses the cache entirely: the result reflects only flushed state.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        self.core.ensure_open("query")?;
        self.core.conn.query(sql, params)
    }

    /// Runs a raw write statement against the store.
    ///
    /// Bypasses the cache: entries already materialized for affected rows
    /// keep their in-memory state until refreshed by a later select.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.core.ensure_open("execute")?;
        self.core.conn.execute(sql, params)
    }

    /// Closes the database.
    ///
    /// Stops the reaper synchronously, flushes and evicts every table, and
    /// blocks all further operations. Idempotent; the first error from the
    /// final flush pass is returned after the pass completes.
    pub fn close(&self) -> Result<()> {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(mut reaper) = take_reaper(&self.reaper) {
            reaper.stop();
        }

        let mut tables = self.core.lock_tables();
        let drained: Vec<(String, Arc<TableInner>)> = tables.drain().collect();
        drop(tables);

        let mut first_error = None;
        for (name, inner) in drained {
            if let Err(error) = Table::from_inner(inner).close_flush() {
                tracing::error!(table = %name, %error, "flush during close failed");
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        tracing::info!(database = %self.core.name, "database closed");
        first_error.map_or(Ok(()), Err)
    }
}

fn take_reaper(slot: &Mutex<Option<Reaper>>) -> Option<Reaper> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.core.is_closed()
            && let Err(error) = self.close()
        {
            tracing::error!(%error, "close on drop failed");
        }
    }
}
