//! Declared relationships between tables.
//!
//! A [`TableLink`] is a many-to-one relationship declared at table-creation
//! time: the declaring (source) table points one of its columns at a key
//! column of a target table, with an optional cascade action applied when the
//! target row is deleted or its key updated. Descriptors are immutable once
//! registered.

/// Action applied to source rows when the linked target row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// Leave source rows untouched.
    #[default]
    NoAction,
    /// Propagate the change to source rows.
    Cascade,
}

impl ReferentialAction {
    /// SQL keyword for the action, as used in `FOREIGN KEY` clauses.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Cascade => "CASCADE",
        }
    }
}

/// A declared many-to-one link between two tables.
///
/// Built with the source table implicit; registration fills it in from the
/// table being created.
///
/// # Examples
///
/// ```rust
/// use rowstash::{ReferentialAction, TableLink};
///
/// let link = TableLink::new("users", "id", "teacher_id")
///     .on_delete(ReferentialAction::Cascade);
/// assert_eq!(link.target_table, "users");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLink {
    /// Table that declares the link. Filled in at registration.
    pub source_table: String,
    /// Column of the source table holding the reference.
    pub source_key: String,
    /// Table the link points at.
    pub target_table: String,
    /// Key column of the target table.
    pub target_key: String,
    /// Action applied to source rows when the target row is deleted.
    pub on_delete: ReferentialAction,
    /// Action applied to source rows when the target key is updated.
    pub on_update: ReferentialAction,
}

impl TableLink {
    /// Declares a link from `source_key` in the declaring table to
    /// `target_table.target_key`.
    #[must_use]
    pub fn new(
        target_table: impl Into<String>,
        target_key: impl Into<String>,
        source_key: impl Into<String>,
    ) -> Self {
        Self {
            source_table: String::new(),
            source_key: source_key.into(),
            target_table: target_table.into(),
            target_key: target_key.into(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    /// Sets the on-delete action.
    #[must_use]
    pub const fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Sets the on-update action.
    #[must_use]
    pub const fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    /// Renders the `FOREIGN KEY` clause for `CREATE TABLE`.
    ///
    /// Native enforcement stays disabled on the connection; the clause
    /// documents the relationship at the engine level and keeps the DDL
    /// honest for external tools.
    #[must_use]
    pub fn as_foreign_key_clause(&self) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            self.source_key,
            self.target_table,
            self.target_key,
            self.on_delete.as_sql(),
            self.on_update.as_sql()
        )
    }
}
