//! Schema-version ledger gating table migrations.
//!
//! A reserved `table_versions` table records one `(table_name, version)` row
//! per user table. Versions start at 0 when the table is created and advance
//! by exactly 1 per applied migration:
//!
//! - requested version ≤ recorded version → idempotent no-op (safe replay)
//! - requested version = recorded + 1 → statements run, ledger advances
//! - anything else → sequencing error; no skipping, no schema-diff inference
//!
//! The gate makes startup migration lists safe to run unconditionally: each
//! step is applied at most once, in order, across restarts.

use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::models::Value;
use crate::{Error, Result};

/// Name of the reserved ledger table.
pub const VERSION_TABLE: &str = "table_versions";

/// Whether a table name is reserved for the ledger.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name == VERSION_TABLE
}

/// Handle to the version ledger rows.
#[derive(Debug)]
pub(crate) struct VersionLedger {
    conn: Arc<ConnectionManager>,
}

impl VersionLedger {
    pub(crate) const fn new(conn: Arc<ConnectionManager>) -> Self {
        Self { conn }
    }

    /// Creates the ledger table if missing. Called once at database open.
    pub(crate) fn ensure_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS table_versions (
                table_name TEXT PRIMARY KEY,
                version INTEGER NOT NULL
            )",
            &[],
        )?;
        Ok(())
    }

    /// The recorded version of a table, `None` when it has no record.
    pub(crate) fn version_of(&self, table: &str) -> Result<Option<i64>> {
        let rows = self.conn.query(
            "SELECT version FROM table_versions WHERE table_name = ?1",
            &[Value::Text(table.to_string())],
        )?;
        Ok(rows.first().and_then(|row| row.first()).and_then(Value::as_integer))
    }

    /// Records (or overwrites) a table's version.
    pub(crate) fn record(&self, table: &str, version: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO table_versions (table_name, version) VALUES (?1, ?2)",
            &[Value::Text(table.to_string()), Value::Integer(version)],
        )?;
        Ok(())
    }

    /// Ensures a table has a version record, starting it at 0.
    pub(crate) fn ensure_record(&self, table: &str) -> Result<()> {
        if self.version_of(table)?.is_none() {
            self.record(table, 0)?;
        }
        Ok(())
    }

    /// Removes a table's version record (the table was dropped).
    pub(crate) fn remove(&self, table: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM table_versions WHERE table_name = ?1",
            &[Value::Text(table.to_string())],
        )?;
        Ok(())
    }

    /// Gate for one migration step. Returns whether the statements should run.
    ///
    /// # Errors
    ///
    /// - [`Error::TableNotFound`] when the table has no version record
    /// - [`Error::VersionSequence`] when `requested` is not current + 1
    pub(crate) fn gate(&self, table: &str, requested: i64) -> Result<bool> {
        let current = self
            .version_of(table)?
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;
        if requested <= current {
            tracing::debug!(table, requested, current, "migration already applied, skipping");
            return Ok(false);
        }
        if requested != current + 1 {
            return Err(Error::VersionSequence {
                table: table.to_string(),
                current,
                requested,
            });
        }
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::DEFAULT_LOCK_TIMEOUT;
    use test_case::test_case;

    fn ledger() -> VersionLedger {
        let conn = Arc::new(ConnectionManager::open_in_memory(DEFAULT_LOCK_TIMEOUT).unwrap());
        let ledger = VersionLedger::new(conn);
        ledger.ensure_table().unwrap();
        ledger
    }

    #[test]
    fn test_record_roundtrip() {
        let ledger = ledger();
        assert_eq!(ledger.version_of("users").unwrap(), None);
        ledger.ensure_record("users").unwrap();
        assert_eq!(ledger.version_of("users").unwrap(), Some(0));
        // ensure_record never resets an existing version
        ledger.record("users", 3).unwrap();
        ledger.ensure_record("users").unwrap();
        assert_eq!(ledger.version_of("users").unwrap(), Some(3));
    }

    #[test]
    fn test_remove() {
        let ledger = ledger();
        ledger.ensure_record("users").unwrap();
        ledger.remove("users").unwrap();
        assert_eq!(ledger.version_of("users").unwrap(), None);
    }

    #[test_case(0, false ; "replay of current version is a no-op")]
    #[test_case(-1, false ; "stale version is a no-op")]
    #[test_case(1, true ; "next version passes the gate")]
    fn test_gate(requested: i64, runs: bool) {
        let ledger = ledger();
        ledger.ensure_record("users").unwrap();
        assert_eq!(ledger.gate("users", requested).unwrap(), runs);
    }

    #[test_case(2 ; "skipping one version")]
    #[test_case(7 ; "skipping several versions")]
    fn test_gate_rejects_out_of_sequence(requested: i64) {
        let ledger = ledger();
        ledger.ensure_record("users").unwrap();
        let result = ledger.gate("users", requested);
        assert!(matches!(
            result,
            Err(Error::VersionSequence { current: 0, .. })
        ));
    }

    #[test]
    fn test_gate_unknown_table() {
        let ledger = ledger();
        assert!(matches!(
            ledger.gate("ghost", 1),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn test_reserved_name() {
        assert!(is_reserved("table_versions"));
        assert!(!is_reserved("users"));
    }
}
