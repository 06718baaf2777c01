//! # Rowstash
//!
//! A concurrency-safe, write-back row cache over SQLite.
//!
//! Rowstash exposes tables and rows as live, shared, mutable objects backed
//! by a SQLite database while coalescing and deferring writes. Field edits
//! are buffered in memory and flushed in one statement — explicitly, when the
//! last handle to a row is released, or by a background reaper that evicts
//! cached objects nobody references anymore.
//!
//! ## Features
//!
//! - Identity caching: one live cached object per primary-key tuple
//! - Dirty-field buffering with flush-on-release
//! - Single shared connection behind an instrumented, bounded-timeout lock
//! - Schema-version-gated migrations (strict +1 increments)
//! - Relational links with cascade-on-delete across cached objects
//! - Background reaper that flushes before every eviction
//!
//! ## Example
//!
//! ```rust,ignore
//! use rowstash::{Database, DatabaseConfig, TableSpec};
//!
//! let db = Database::open_in_memory(DatabaseConfig::default())?;
//! let users = db.create_table(
//!     &TableSpec::new("users")
//!         .column("id", "INTEGER")
//!         .column("name", "TEXT")
//!         .primary_key(["id"]),
//! )?;
//!
//! let row = users.add(&[("id", 1.into()), ("name", "ada".into())])?;
//! row.set("name", "lovelace".into())?;
//! // The edit is buffered; it reaches the store on flush or handle release.
//! row.flush()?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::time::Duration;

use thiserror::Error as ThisError;

// Module declarations
pub mod cache;
pub mod config;
pub mod connection;
pub mod database;
pub mod gc;
pub mod links;
pub mod migrations;
pub mod models;

// Re-exports for convenience
pub use cache::{Entry, Table};
pub use config::DatabaseConfig;
pub use connection::{ConnectionManager, LockStats};
pub use database::Database;
pub use gc::ReaperConfig;
pub use models::{ReferentialAction, SelectOptions, TableLink, TableSpec, Value};

/// Error type for rowstash operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Classes
///
/// | Variant | Class | Raised When |
/// |---------|-------|-------------|
/// | `Closed` | structural | any call on a closed database or table |
/// | `TableNotFound` | structural | unknown table on lookup, drop, or relation traversal |
/// | `ColumnNotFound` | structural | unknown field on entry access |
/// | `ColumnOutOfRange` | structural | positional entry access past the row width |
/// | `VersionSequence` | structural | migration version is not exactly current + 1 |
/// | `LinkCycle` | structural | CASCADE link registration would close a cycle |
/// | `LockTimeout` | availability | connection lock wait exceeded the bound |
/// | `Execution` | engine | statement or commit failure in SQLite |
/// | `NotImplemented` | scope | statement-less migrations |
/// | `InvalidInput` | structural | bad identifiers, partial key filters, key mutation |
///
/// Structural errors abort the call and are never retried internally. Engine
/// errors are returned as values so callers can observe them; the connection
/// layer logs them as well.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The database was closed before or during the operation.
    #[error("database is closed (operation '{operation}')")]
    Closed {
        /// The operation that was refused.
        operation: String,
    },

    /// No table with the given name exists.
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// No column with the given name exists in the table.
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound {
        /// The table whose schema was consulted.
        table: String,
        /// The column that was requested.
        column: String,
    },

    /// Positional access past the end of the row.
    #[error("column index {index} out of range for table '{table}' ({width} columns)")]
    ColumnOutOfRange {
        /// The table whose schema was consulted.
        table: String,
        /// The requested position.
        index: usize,
        /// The number of columns in the row.
        width: usize,
    },

    /// A migration was requested out of sequence.
    ///
    /// Versions advance by exactly 1. Stale versions (≤ current) are treated
    /// as idempotent replays and never reach this error.
    #[error(
        "table '{table}' version {requested} is not one more than the current version {current}"
    )]
    VersionSequence {
        /// The table being migrated.
        table: String,
        /// The version currently recorded in the ledger.
        current: i64,
        /// The version that was requested.
        requested: i64,
    },

    /// Registering the link would create a cycle of CASCADE edges.
    ///
    /// Cascade deletion recurses over the link graph; a cycle would make that
    /// recursion unbounded, so registration rejects it up front.
    #[error("link from '{from_table}' to '{target}' would create a cascade cycle")]
    LinkCycle {
        /// Source table of the rejected link.
        from_table: String,
        /// Target table of the rejected link.
        target: String,
    },

    /// The connection lock could not be acquired within the bounded wait.
    #[error("operation '{operation}' timed out acquiring the connection lock after {timeout:?}")]
    LockTimeout {
        /// The operation that was waiting.
        operation: String,
        /// The configured bound that elapsed.
        timeout: Duration,
    },

    /// A statement failed in the underlying engine.
    #[error("operation '{operation}' failed: {cause}")]
    Execution {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature deliberately out of scope.
    ///
    /// Raised when a migration is requested without an explicit statement
    /// list: schema-diff inference is unsupported by design.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for rowstash operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TableNotFound("users".to_string());
        assert_eq!(err.to_string(), "table 'users' not found");

        let err = Error::Closed {
            operation: "get_row".to_string(),
        };
        assert_eq!(err.to_string(), "database is closed (operation 'get_row')");

        let err = Error::VersionSequence {
            table: "users".to_string(),
            current: 2,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "table 'users' version 5 is not one more than the current version 2"
        );

        let err = Error::ColumnNotFound {
            table: "users".to_string(),
            column: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "column 'nope' not found in table 'users'");
    }
}
