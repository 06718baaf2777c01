//! Select scenarios: filtering, ordering, and pagination are delegated to
//! the engine verbatim, and materialized rows reuse cached entries.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use rowstash::{Database, DatabaseConfig, SelectOptions, Table, Value};

fn open_with_rows() -> (Database, Table) {
    let db = Database::open_in_memory(DatabaseConfig::new().without_reaper()).unwrap();
    let table = db
        .create_table(
            &rowstash::TableSpec::new("samples")
                .column("id", "INTEGER")
                .column("a", "INTEGER")
                .column("b", "INTEGER")
                .primary_key(["id"]),
        )
        .unwrap();
    for i in 0..100i64 {
        table
            .add(&[("id", i.into()), ("a", i.into()), ("b", i.into())])
            .unwrap();
    }
    (db, table)
}

fn ids(rows: &[rowstash::Entry]) -> Vec<i64> {
    rows.iter()
        .map(|row| row.get("id").unwrap().as_integer().unwrap())
        .collect()
}

#[test]
fn select_with_predicate() {
    let (_db, table) = open_with_rows();
    let rows = table.select(&SelectOptions::new().filter("id > 50")).unwrap();
    assert_eq!(rows.len(), 49);
    assert_eq!(ids(&rows)[0], 51);
    assert_eq!(ids(&rows)[48], 99);
}

#[test]
fn select_with_limit() {
    let (_db, table) = open_with_rows();
    let rows = table
        .select(&SelectOptions::new().filter("id > 50").limit(10))
        .unwrap();
    assert_eq!(ids(&rows), (51..=60).collect::<Vec<_>>());
}

#[test]
fn select_with_limit_and_offset() {
    let (_db, table) = open_with_rows();
    let rows = table
        .select(&SelectOptions::new().filter("id > 50").limit(10).offset(10))
        .unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(ids(&rows)[0], 61);
    assert_eq!(ids(&rows)[9], 70);
}

#[test]
fn select_with_order_by() {
    let (_db, table) = open_with_rows();
    let rows = table
        .select(&SelectOptions::new().filter("id > 50").order_by("id DESC"))
        .unwrap();
    assert_eq!(rows.len(), 49);
    assert_eq!(ids(&rows)[0], 99);
    assert_eq!(ids(&rows)[48], 51);
}

#[test]
fn select_with_order_by_and_limit() {
    let (_db, table) = open_with_rows();
    let rows = table
        .select(
            &SelectOptions::new()
                .filter("id > 50")
                .order_by("id DESC")
                .limit(10),
        )
        .unwrap();
    assert_eq!(ids(&rows), (90..=99).rev().collect::<Vec<_>>());
}

#[test]
fn select_with_order_by_limit_and_offset() {
    let (_db, table) = open_with_rows();
    let rows = table
        .select(
            &SelectOptions::new()
                .filter("id > 50")
                .order_by("id DESC")
                .limit(10)
                .offset(10),
        )
        .unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(ids(&rows)[0], 89);
    assert_eq!(ids(&rows)[9], 80);
}

#[test]
fn select_with_compound_predicate() {
    let (_db, table) = open_with_rows();
    let rows = table
        .select(&SelectOptions::new().filter("id > 50 AND a < 60"))
        .unwrap();
    assert_eq!(rows.len(), 9);
    assert_eq!(ids(&rows)[0], 51);
    assert_eq!(ids(&rows)[8], 59);
}

#[test]
fn get_all_returns_every_row() {
    let (_db, table) = open_with_rows();
    assert_eq!(table.get_all().unwrap().len(), 100);
}

#[test]
fn select_reuses_cached_entries_and_keeps_dirty_edits() {
    let (_db, table) = open_with_rows();
    let row = table
        .select(&SelectOptions::new().filter("id = 50"))
        .unwrap()
        .remove(0);
    row.set("a", 1000.into()).unwrap();

    // A second select returns the same entry: the dirty edit is visible
    // even though the store still has the old value.
    let again = table
        .select(&SelectOptions::new().filter("id = 50"))
        .unwrap()
        .remove(0);
    assert_eq!(again.get("a").unwrap(), Value::Integer(1000));
    assert!(again.is_dirty());
}

#[test]
fn select_refreshes_clean_fields_from_store() {
    let (db, table) = open_with_rows();
    let row = table
        .select(&SelectOptions::new().filter("id = 50"))
        .unwrap()
        .remove(0);
    row.set("a", 1000.into()).unwrap();

    // Change a different column behind the cache's back.
    db.execute("UPDATE samples SET b = 7 WHERE id = 50", &[])
        .unwrap();

    let again = table
        .select(&SelectOptions::new().filter("id = 50"))
        .unwrap()
        .remove(0);
    // Dirty edit wins; the clean column picked up the raw update.
    assert_eq!(again.get("a").unwrap(), Value::Integer(1000));
    assert_eq!(again.get("b").unwrap(), Value::Integer(7));
}
