//! End-to-end tests for table lifecycle: creation, identity, migration,
//! drop, and closed-database behavior.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use rowstash::{Database, DatabaseConfig, Error, SelectOptions, TableSpec, Value};

fn open_db() -> Database {
    Database::open_in_memory(DatabaseConfig::new().without_reaper()).unwrap()
}

fn users_spec() -> TableSpec {
    TableSpec::new("users")
        .column("id", "INTEGER")
        .column("name", "TEXT")
        .column("age", "INTEGER")
        .primary_key(["id"])
}

#[test]
fn create_table_and_lookup_share_identity() {
    let db = open_db();
    let created = db.create_table(&users_spec()).unwrap();
    let looked_up = db.table("users").unwrap();

    // Mutations through one handle are visible through the other.
    created
        .add(&[("id", 1.into()), ("name", "ada".into()), ("age", 36.into())])
        .unwrap();
    let row = looked_up
        .get_row(&[("id", 1.into())])
        .unwrap()
        .expect("row should exist");
    assert_eq!(row.get("name").unwrap(), Value::Text("ada".into()));
}

#[test]
fn create_table_twice_returns_same_handle() {
    let db = open_db();
    let first = db.create_table(&users_spec()).unwrap();
    first
        .add(&[("id", 1.into()), ("name", "ada".into()), ("age", 36.into())])
        .unwrap();
    let row = first.get_row(&[("id", 1.into())]).unwrap().unwrap();
    row.set("age", 37.into()).unwrap();

    // Re-creation must not build a second cache for the same table.
    let second = db.create_table(&users_spec()).unwrap();
    let same_row = second.get_row(&[("id", 1.into())]).unwrap().unwrap();
    assert_eq!(same_row.get("age").unwrap(), Value::Integer(37));
}

#[test]
fn get_row_identity_observes_unflushed_mutations() {
    let db = open_db();
    let users = db.create_table(&users_spec()).unwrap();
    let row = users
        .add(&[("id", 1.into()), ("name", "ada".into()), ("age", 36.into())])
        .unwrap();

    let row2 = users.get_row(&[("id", 1.into())]).unwrap().unwrap();
    row.set("age", 40.into()).unwrap();
    assert_eq!(row2.get("age").unwrap(), Value::Integer(40));
}

#[test]
fn get_row_missing_returns_none() {
    let db = open_db();
    let users = db.create_table(&users_spec()).unwrap();
    assert!(users.get_row(&[("id", 404.into())]).unwrap().is_none());
}

#[test]
fn unknown_table_is_not_found() {
    let db = open_db();
    assert!(matches!(db.table("ghost"), Err(Error::TableNotFound(_))));
    assert!(matches!(
        db.drop_table("ghost"),
        Err(Error::TableNotFound(_))
    ));
}

#[test]
fn unknown_column_access_fails() {
    let db = open_db();
    let users = db.create_table(&users_spec()).unwrap();
    let row = users
        .add(&[("id", 1.into()), ("name", "ada".into()), ("age", 36.into())])
        .unwrap();

    assert!(matches!(
        row.get("shoe_size"),
        Err(Error::ColumnNotFound { .. })
    ));
    assert!(matches!(row.at(17), Err(Error::ColumnOutOfRange { .. })));
    // Positional access within range works.
    assert_eq!(row.at(1).unwrap(), Value::Text("ada".into()));
}

#[test]
fn add_reflects_autoincrement_and_defaults() {
    let db = open_db();
    let posts = db
        .create_table(
            &TableSpec::new("posts")
                .column("id", "INTEGER PRIMARY KEY AUTOINCREMENT")
                .column("title", "TEXT")
                .column("status", "TEXT DEFAULT 'draft'"),
        )
        .unwrap();

    let first = posts.add(&[("title", "hello".into())]).unwrap();
    let second = posts.add(&[("title", "world".into())]).unwrap();

    assert_eq!(first.get("id").unwrap(), Value::Integer(1));
    assert_eq!(second.get("id").unwrap(), Value::Integer(2));
    assert_eq!(first.get("status").unwrap(), Value::Text("draft".into()));
}

#[test]
fn update_or_add_upserts_by_key() {
    let db = open_db();
    let users = db.create_table(&users_spec()).unwrap();

    let added = users
        .update_or_add(&[("id", 1.into()), ("name", "ada".into()), ("age", 36.into())])
        .unwrap();
    assert_eq!(added.get("name").unwrap(), Value::Text("ada".into()));

    let updated = users
        .update_or_add(&[("id", 1.into()), ("name", "lovelace".into()), ("age", 37.into())])
        .unwrap();
    assert_eq!(updated.get("age").unwrap(), Value::Integer(37));

    // The upsert flushed: the store agrees without any cache involvement.
    let raw = db
        .query("SELECT name, age FROM users WHERE id = 1", &[])
        .unwrap();
    assert_eq!(raw[0][0], Value::Text("lovelace".into()));
    assert_eq!(raw[0][1], Value::Integer(37));
    assert_eq!(
        db.query("SELECT COUNT(*) FROM users", &[]).unwrap()[0][0],
        Value::Integer(1)
    );
}

#[test]
fn migration_applies_and_reloads_schema() {
    let db = open_db();
    let users = db.create_table(&users_spec()).unwrap();
    let row = users
        .add(&[("id", 1.into()), ("name", "ada".into()), ("age", 36.into())])
        .unwrap();
    assert!(!users.columns().iter().any(|c| c.name == "email"));

    db.update_table("users", 1, &["ALTER TABLE users ADD COLUMN email TEXT"])
        .unwrap();

    assert!(users.columns().iter().any(|c| c.name == "email"));
    // The cached entry survives the migration and sees the new column.
    assert_eq!(row.get("email").unwrap(), Value::Null);
    let same = users.get_row(&[("id", 1.into())]).unwrap().unwrap();
    assert_eq!(same.get("name").unwrap(), Value::Text("ada".into()));
}

#[test]
fn migration_is_idempotent_against_replay() {
    let db = open_db();
    db.create_table(&users_spec()).unwrap();

    let statements = &["ALTER TABLE users ADD COLUMN email TEXT"];
    db.update_table("users", 1, statements).unwrap();
    // Replaying the same version applies the statements at most once.
    db.update_table("users", 1, statements).unwrap();
    // A stale version is also a no-op rather than an error.
    db.update_table("users", 0, statements).unwrap();

    let columns = db
        .query("PRAGMA table_info(users)", &[])
        .unwrap()
        .iter()
        .filter(|row| row[1] == Value::Text("email".into()))
        .count();
    assert_eq!(columns, 1);
}

#[test]
fn migration_version_must_advance_by_one() {
    let db = open_db();
    db.create_table(&users_spec()).unwrap();

    let result = db.update_table("users", 3, &["ALTER TABLE users ADD COLUMN email TEXT"]);
    assert!(matches!(
        result,
        Err(Error::VersionSequence {
            current: 0,
            requested: 3,
            ..
        })
    ));
}

#[test]
fn migration_requires_explicit_statements() {
    let db = open_db();
    db.create_table(&users_spec()).unwrap();
    assert!(matches!(
        db.update_table("users", 1, &[]),
        Err(Error::NotImplemented(_))
    ));
}

#[test]
fn migration_refreshes_clean_fields_on_select() {
    let db = open_db();
    let users = db.create_table(&users_spec()).unwrap();
    let row = users
        .add(&[("id", 1.into()), ("name", "ada".into()), ("age", 36.into())])
        .unwrap();

    db.update_table(
        "users",
        1,
        &[
            "ALTER TABLE users ADD COLUMN email TEXT",
            "UPDATE users SET email = 'ada@example.org'",
        ],
    )
    .unwrap();

    // The cached entry is stale until a select refreshes its clean fields.
    assert_eq!(row.get("email").unwrap(), Value::Null);
    let refreshed = users
        .select(&SelectOptions::new().filter("id = 1"))
        .unwrap();
    assert_eq!(
        refreshed[0].get("email").unwrap(),
        Value::Text("ada@example.org".into())
    );
}

#[test]
fn drop_table_removes_table_and_version_record() {
    let db = open_db();
    db.create_table(&users_spec()).unwrap();
    assert_eq!(
        db.query(
            "SELECT version FROM table_versions WHERE table_name = ?1",
            &[Value::Text("users".into())],
        )
        .unwrap()[0][0],
        Value::Integer(0)
    );

    db.drop_table("users").unwrap();

    assert!(matches!(db.table("users"), Err(Error::TableNotFound(_))));
    assert!(
        db.query(
            "SELECT version FROM table_versions WHERE table_name = ?1",
            &[Value::Text("users".into())],
        )
        .unwrap()
        .is_empty()
    );
}

#[test]
fn reserved_ledger_table_cannot_be_managed() {
    let db = open_db();
    assert!(matches!(
        db.create_table(&TableSpec::new("table_versions").column("x", "INTEGER")),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        db.drop_table("table_versions"),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn closed_database_refuses_operations() {
    let db = open_db();
    let users = db.create_table(&users_spec()).unwrap();
    let row = users
        .add(&[("id", 1.into()), ("name", "ada".into()), ("age", 36.into())])
        .unwrap();

    db.close().unwrap();
    assert!(db.is_closed());
    // Close is idempotent.
    db.close().unwrap();

    assert!(matches!(db.table("users"), Err(Error::Closed { .. })));
    assert!(matches!(
        db.create_table(&users_spec()),
        Err(Error::Closed { .. })
    ));
    assert!(matches!(
        users.get_row(&[("id", 1.into())]),
        Err(Error::Closed { .. })
    ));
    assert!(matches!(row.set("age", 1.into()), Err(Error::Closed { .. })));
    assert!(matches!(row.flush(), Err(Error::Closed { .. })));
    assert!(matches!(db.query("SELECT 1", &[]), Err(Error::Closed { .. })));
}

#[test]
fn close_flushes_dirty_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("close_flush.db");

    let db = Database::open(&path, DatabaseConfig::new().without_reaper()).unwrap();
    let users = db.create_table(&users_spec()).unwrap();
    let row = users
        .add(&[("id", 1.into()), ("name", "ada".into()), ("age", 36.into())])
        .unwrap();
    row.set("age", 99.into()).unwrap();
    db.close().unwrap();
    drop(row);
    drop(users);
    drop(db);

    let reopened = Database::open(&path, DatabaseConfig::new().without_reaper()).unwrap();
    let raw = reopened
        .query("SELECT age FROM users WHERE id = 1", &[])
        .unwrap();
    assert_eq!(raw[0][0], Value::Integer(99));
}

#[test]
fn lock_stats_count_acquisitions() {
    let db = open_db();
    db.create_table(&users_spec()).unwrap();
    let stats = db.lock_stats();
    assert!(stats.acquired > 0);
    assert_eq!(stats.queued, 0);
}

#[test]
fn invalid_identifiers_are_rejected() {
    let db = open_db();
    let result = db.create_table(
        &TableSpec::new("users; DROP TABLE table_versions").column("id", "INTEGER"),
    );
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}
