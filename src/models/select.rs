//! Read-query options for `Table::select`.

use std::fmt::Write as _;

/// Filter, ordering, and pagination options for a table read.
///
/// The `where`/`order_by` fragments are handed to SQLite verbatim — the cache
/// layer never re-sorts or re-filters in memory, so result order and slicing
/// are exactly what the engine produces.
///
/// # Examples
///
/// ```rust
/// use rowstash::SelectOptions;
///
/// let opts = SelectOptions::new()
///     .filter("id > 50")
///     .order_by("id DESC")
///     .limit(10)
///     .offset(10);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub(crate) where_clause: Option<String>,
    pub(crate) order_by: Option<String>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
}

impl SelectOptions {
    /// Starts an unfiltered select.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the SQL `WHERE` predicate (without the keyword).
    #[must_use]
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = Some(predicate.into());
        self
    }

    /// Sets the SQL `ORDER BY` clause (without the keyword).
    #[must_use]
    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` matching rows.
    ///
    /// SQLite requires `LIMIT` with `OFFSET`; an offset without a limit gets
    /// `LIMIT -1` (unlimited) when rendered.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Renders the trailing query fragments after `SELECT * FROM <table>`.
    pub(crate) fn render_suffix(&self) -> String {
        let mut sql = String::new();
        if let Some(predicate) = &self.where_clause {
            let _ = write!(sql, " WHERE {predicate}");
        }
        if let Some(order) = &self.order_by {
            let _ = write!(sql, " ORDER BY {order}");
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                let _ = write!(sql, " LIMIT {limit} OFFSET {offset}");
            },
            (Some(limit), None) => {
                let _ = write!(sql, " LIMIT {limit}");
            },
            (None, Some(offset)) => {
                let _ = write!(sql, " LIMIT -1 OFFSET {offset}");
            },
            (None, None) => {},
        }
        sql
    }
}
