//! Core data types: SQLite values, primary keys, schemas, links, and
//! select options.

mod link;
mod schema;
mod select;
mod value;

pub use link::{ReferentialAction, TableLink};
pub use schema::{ColumnInfo, TableSchema, TableSpec, validate_identifier};
pub use select::SelectOptions;
pub use value::{PrimaryKey, Value};
