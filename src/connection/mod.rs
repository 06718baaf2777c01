//! Serialized access to the single SQLite connection.
//!
//! Exactly one physical connection exists per database; every statement and
//! commit funnels through the [`GuardedLock`] here with a bounded wait. The
//! engine's own concurrency is deliberately not relied upon — WAL mode and
//! `busy_timeout` only soften contention with other processes.
//!
//! The connection runs in autocommit mode: each statement commits as it
//! completes. [`ConnectionManager::batch`] joins statements into one script
//! executed under a single lock acquisition, which is **not** atomic at the
//! engine level — a mid-script failure leaves the earlier statements
//! committed. Callers that need atomicity pass pre-validated statements.
//!
//! Every path returns `Result` so failures are observable to callers; the
//! manager additionally logs engine errors, and logs the offending statement
//! text when the cause looks like a syntax problem.

mod guard;

pub use guard::{GuardedLock, LockGuard, LockStats};

use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::models::Value;
use crate::{Error, Result};

/// Default bound on waiting for the connection lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Records statement metrics for the connection layer.
///
/// Two series per statement: a counter by status and a latency histogram.
fn record_statement_metrics(operation: &'static str, start: Instant, status: &'static str) {
    metrics::counter!(
        "connection_statements_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "connection_statement_duration_ms",
        "operation" => operation
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Single point of serialized access to the underlying engine.
pub struct ConnectionManager {
    conn: GuardedLock<Connection>,
    lock_timeout: Duration,
}

impl ConnectionManager {
    /// Opens (or creates) a database file.
    pub fn open(path: &std::path::Path, lock_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Execution {
            operation: "open".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_connection(conn, lock_timeout)
    }

    /// Opens an in-memory database.
    pub fn open_in_memory(lock_timeout: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Execution {
            operation: "open_in_memory".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_connection(conn, lock_timeout)
    }

    fn from_connection(conn: Connection, lock_timeout: Duration) -> Result<Self> {
        configure_connection(&conn);
        Ok(Self {
            conn: GuardedLock::new(conn),
            lock_timeout,
        })
    }

    /// Snapshot of the lock contention counters.
    #[must_use]
    pub fn lock_stats(&self) -> LockStats {
        self.conn.stats()
    }

    /// Runs a closure with the connection under one lock acquisition.
    ///
    /// This is the batch path: table flushes and insert-then-materialize use
    /// it so their statement sequence is not interleaved with other callers.
    pub(crate) fn with_connection<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let guard = self.conn.lock_timeout(operation, self.lock_timeout)?;
        f(&guard)
    }

    /// Executes one parameterized statement, returning affected rows.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let start = Instant::now();
        let guard = self.conn.lock_timeout("execute", self.lock_timeout)?;
        let result = guard
            .execute(sql, rusqlite::params_from_iter(params.iter()))
            .map_err(|e| execution_error("execute", sql, &e));
        drop(guard);
        record_statement_metrics("execute", start, status_of(result.is_ok()));
        result
    }

    /// Executes one statement repeatedly over batched parameter sets.
    ///
    /// The statement is prepared once and the whole batch runs under a single
    /// lock acquisition. Returns the total affected rows.
    pub fn execute_many(&self, sql: &str, batches: &[Vec<Value>]) -> Result<usize> {
        let start = Instant::now();
        let guard = self.conn.lock_timeout("execute_many", self.lock_timeout)?;
        let result = (|| {
            let mut statement = guard
                .prepare(sql)
                .map_err(|e| execution_error("execute_many", sql, &e))?;
            let mut affected = 0;
            for params in batches {
                affected += statement
                    .execute(rusqlite::params_from_iter(params.iter()))
                    .map_err(|e| execution_error("execute_many", sql, &e))?;
            }
            Ok(affected)
        })();
        drop(guard);
        record_statement_metrics("execute_many", start, status_of(result.is_ok()));
        result
    }

    /// Executes several statements as one script under a single lock
    /// acquisition.
    ///
    /// Empty statements are skipped; the rest are joined with `;\n` and run
    /// statement-by-statement by the engine. Not atomic: a failure partway
    /// leaves prior statements committed.
    pub fn batch(&self, statements: &[String]) -> Result<()> {
        let script = statements
            .iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(";\n");
        if script.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let guard = self.conn.lock_timeout("batch", self.lock_timeout)?;
        let result = guard
            .execute_batch(&script)
            .map_err(|e| execution_error("batch", &script, &e));
        drop(guard);
        record_statement_metrics("batch", start, status_of(result.is_ok()));
        result
    }

    /// Runs a read query and materializes every row as a `Vec<Value>`.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let start = Instant::now();
        let guard = self.conn.lock_timeout("query", self.lock_timeout)?;
        let result = query_all(&guard, sql, params);
        drop(guard);
        record_statement_metrics("query", start, status_of(result.is_ok()));
        result
    }

    /// Whether a table with the given name exists in the store.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let rows = self.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::Text(name.to_string())],
        )?;
        Ok(!rows.is_empty())
    }

    /// Column metadata rows for a table, straight from `PRAGMA table_info`.
    pub fn table_info(&self, table: &str) -> Result<Vec<Vec<Value>>> {
        crate::models::validate_identifier(table)?;
        self.query(&format!("PRAGMA table_info({table})"), &[])
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("lock_timeout", &self.lock_timeout)
            .field("stats", &self.conn.stats())
            .finish_non_exhaustive()
    }
}

/// Reads every row of a query on an already-locked connection.
pub(crate) fn query_all(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
    let mut statement = conn
        .prepare(sql)
        .map_err(|e| execution_error("query", sql, &e))?;
    let width = statement.column_count();
    let mut rows = statement
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(|e| execution_error("query", sql, &e))?;

    let mut result = Vec::new();
    while let Some(row) = rows.next().map_err(|e| execution_error("query", sql, &e))? {
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            let value = row
                .get_ref(index)
                .map_err(|e| execution_error("query", sql, &e))?;
            values.push(Value::from(value));
        }
        result.push(values);
    }
    Ok(result)
}

/// Maps an engine error, logging it; syntax problems also log the statement.
pub(crate) fn execution_error(operation: &str, sql: &str, error: &rusqlite::Error) -> Error {
    let cause = error.to_string();
    tracing::error!(operation, %cause, "statement execution failed");
    if cause.contains("syntax error") {
        tracing::error!(statement = sql, "failing statement");
    }
    Error::Execution {
        operation: operation.to_string(),
        cause,
    }
}

const fn status_of(ok: bool) -> &'static str {
    if ok { "success" } else { "error" }
}

/// Configures a connection for concurrent use.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits out cross-process locks instead of failing
/// - **`foreign_keys` stays OFF**: the cache layer drives cascades itself so
///   each one runs exactly once, against the cache and the store together
fn configure_connection(conn: &Connection) {
    // pragma_update returns the pragma's result row, which we do not need
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
}
