//! Table schema metadata and the table-creation spec.
//!
//! [`TableSpec`] is what callers hand to `Database::create_table`;
//! [`TableSchema`] is what the cache layer holds, re-read from
//! `PRAGMA table_info` whenever a migration lands.

use crate::models::link::TableLink;
use crate::models::value::Value;
use crate::{Error, Result};

/// Validates a SQL identifier (table or column name).
///
/// Identifiers are interpolated into DDL and cache keys, so they are
/// restricted to `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "'{name}' is not a valid identifier"
        )))
    }
}

/// Validates a column type declaration fragment.
///
/// Declarations like `INTEGER PRIMARY KEY AUTOINCREMENT` or
/// `TEXT DEFAULT 'draft'` pass; anything that could terminate the statement
/// does not.
fn validate_declaration(decl: &str) -> Result<()> {
    let valid = !decl.is_empty()
        && decl.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ',' | '\'' | '.' | '-')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "'{decl}' is not a valid column declaration"
        )))
    }
}

/// Declarative description of a table to create.
///
/// # Examples
///
/// ```rust
/// use rowstash::{ReferentialAction, TableLink, TableSpec};
///
/// let spec = TableSpec::new("participants")
///     .column("user_id", "INTEGER")
///     .column("class_id", "INTEGER")
///     .primary_key(["user_id", "class_id"])
///     .link(TableLink::new("users", "id", "user_id").on_delete(ReferentialAction::Cascade));
/// ```
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub(crate) name: String,
    pub(crate) columns: Vec<(String, String)>,
    pub(crate) primary_keys: Vec<String>,
    pub(crate) links: Vec<TableLink>,
}

impl TableSpec {
    /// Starts a spec for the named table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Appends a column with its type declaration.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, declaration: impl Into<String>) -> Self {
        self.columns.push((name.into(), declaration.into()));
        self
    }

    /// Declares the composite primary key, in order.
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a link from this table to a target table.
    #[must_use]
    pub fn link(mut self, link: TableLink) -> Self {
        self.links.push(link);
        self
    }

    /// The table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders the `CREATE TABLE IF NOT EXISTS` statement.
    ///
    /// Declared links become `FOREIGN KEY` clauses; enforcement stays with
    /// the cache layer, which keeps the connection's `foreign_keys` pragma
    /// off so cascades run exactly once.
    pub(crate) fn create_statement(&self) -> Result<String> {
        validate_identifier(&self.name)?;
        if self.columns.is_empty() {
            return Err(Error::InvalidInput(format!(
                "table '{}' declares no columns",
                self.name
            )));
        }

        let mut parts = Vec::with_capacity(self.columns.len() + 1 + self.links.len());
        for (column, declaration) in &self.columns {
            validate_identifier(column)?;
            validate_declaration(declaration)?;
            parts.push(format!("{column} {declaration}"));
        }
        if !self.primary_keys.is_empty() {
            for key in &self.primary_keys {
                validate_identifier(key)?;
            }
            parts.push(format!("PRIMARY KEY ({})", self.primary_keys.join(", ")));
        }
        for link in &self.links {
            parts.push(link.as_foreign_key_clause());
        }

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.name,
            parts.join(", ")
        ))
    }
}

/// One column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub decl_type: String,
    /// Whether the column carries `NOT NULL`.
    pub not_null: bool,
    /// 1-based position within the primary key, 0 when not part of it.
    pub pk_ordinal: usize,
}

/// Column metadata for one table, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    columns: Vec<ColumnInfo>,
}

impl TableSchema {
    /// Builds a schema from `PRAGMA table_info` result rows.
    ///
    /// Row shape: `(cid, name, type, notnull, dflt_value, pk)`.
    pub(crate) fn from_pragma_rows(table: &str, rows: &[Vec<Value>]) -> Result<Self> {
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row
                .get(1)
                .and_then(Value::as_text)
                .ok_or_else(|| Error::Execution {
                    operation: format!("load_schema({table})"),
                    cause: "malformed table_info row".to_string(),
                })?
                .to_string();
            let decl_type = row
                .get(2)
                .and_then(Value::as_text)
                .unwrap_or_default()
                .to_string();
            let not_null = row.get(3).and_then(Value::as_integer).unwrap_or(0) != 0;
            let pk_ordinal =
                usize::try_from(row.get(5).and_then(Value::as_integer).unwrap_or(0)).unwrap_or(0);
            columns.push(ColumnInfo {
                name,
                decl_type,
                not_null,
                pk_ordinal,
            });
        }
        Ok(Self { columns })
    }

    /// Columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Position of the named column, if present.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Whether the named column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Primary-key column names, in key order.
    #[must_use]
    pub fn primary_keys(&self) -> Vec<&str> {
        let mut keyed: Vec<&ColumnInfo> =
            self.columns.iter().filter(|c| c.pk_ordinal > 0).collect();
        keyed.sort_by_key(|c| c.pk_ordinal);
        keyed.iter().map(|c| c.name.as_str()).collect()
    }

    /// Positions of the primary-key columns, in key order.
    #[must_use]
    pub(crate) fn primary_key_indices(&self) -> Vec<usize> {
        let mut keyed: Vec<(usize, usize)> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.pk_ordinal > 0)
            .map(|(i, c)| (c.pk_ordinal, i))
            .collect();
        keyed.sort_unstable();
        keyed.into_iter().map(|(_, i)| i).collect()
    }
}
