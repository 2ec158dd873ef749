use rusqlite::Connection;
use salvage::{
    executor::insert::{COMMIT_INTERVAL, Inserter, TableInserter, quote_identifier, table_columns},
    types::{error::RepairError, row::Column, value::Value},
    utils::log::Logger,
};

fn memory(schema: &str) -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(schema).unwrap();
    conn
}

#[test]
fn test_table_columns_evaluates_defaults() {
    let conn = memory(
        "CREATE TABLE t(a INTEGER PRIMARY KEY, b TEXT DEFAULT 'x', c REAL DEFAULT (1.5 * 2), d NOT NULL);",
    );
    let columns = table_columns(&conn, "t").unwrap();

    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d"]);
    assert!(columns[0].primary_key);
    assert_eq!(columns[0].decl_type, "INTEGER");
    assert!(columns[3].not_null);

    let defaults: Vec<&Value> = columns.iter().map(|c| &c.default).collect();
    assert_eq!(
        defaults,
        vec![
            &Value::Null,
            &Value::Text("x".to_string()),
            &Value::Number(3.0),
            &Value::Null
        ]
    );
}

#[test]
fn test_row_id_fills_integer_primary_key() {
    let conn = memory("CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT, tag TEXT DEFAULT 'none');");
    let mut inserter = TableInserter::new(&conn, "t", Logger::default());
    assert_eq!(inserter.table_name(), "t");

    inserter
        .insert(&Column::with_row_id(7, vec![Value::Null, Value::Text("seven".into())]))
        .unwrap();
    inserter
        .insert(&Column::with_row_id(9, vec![Value::Integer(90), Value::Text("ninety".into())]))
        .unwrap();
    assert!(inserter.is_prepared());
    inserter.finish().unwrap();
    assert!(conn.is_autocommit());

    let mut stmt = conn.prepare("SELECT id, name, tag FROM t ORDER BY id").unwrap();
    let rows: Vec<(i64, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    assert_eq!(
        rows,
        vec![
            (7, "seven".to_string(), "none".to_string()),
            (90, "ninety".to_string(), "none".to_string()),
        ]
    );
    assert_eq!(inserter.succeeded(), 2);
    assert_eq!(inserter.failed(), 0);
}

#[test]
fn test_row_id_is_kept_without_alias() {
    let conn = memory("CREATE TABLE \"odd \"\"name\"(v);");
    let mut inserter = TableInserter::new(&conn, "odd \"name", Logger::default());
    inserter
        .insert(&Column::with_row_id(42, vec![Value::Binary(vec![1, 2])]))
        .unwrap();
    inserter.finish().unwrap();

    let (rowid, v): (i64, Vec<u8>) = conn
        .query_row("SELECT rowid, v FROM \"odd \"\"name\"", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(rowid, 42);
    assert_eq!(v, vec![1, 2]);
}

#[test]
fn test_column_named_rowid_is_written_as_data() {
    let conn = memory("CREATE TABLE t(rowid TEXT, v);");
    let mut inserter = TableInserter::new(&conn, "t", Logger::default());
    inserter
        .insert(&Column::with_row_id(5, vec![Value::Text("r".into()), Value::Integer(1)]))
        .unwrap();
    inserter.finish().unwrap();

    let value: String = conn
        .query_row("SELECT rowid FROM t", [], |row| row.get(0))
        .unwrap();
    assert_eq!(value, "r");
}

#[test]
fn test_extra_decoded_values_are_ignored() {
    let conn = memory("CREATE TABLE t(a);");
    let mut inserter = TableInserter::new(&conn, "t", Logger::default());
    inserter
        .insert(&Column::with_row_id(1, vec![Value::Integer(1), Value::Integer(2)]))
        .unwrap();
    inserter.finish().unwrap();
    assert_eq!(inserter.succeeded(), 1);
}

#[test]
fn test_constraint_failure_counts_and_continues() {
    let conn = memory("CREATE TABLE t(a NOT NULL);");
    let mut inserter = TableInserter::new(&conn, "t", Logger::default());
    inserter
        .insert(&Column::with_row_id(1, vec![Value::Null]))
        .unwrap();
    inserter
        .insert(&Column::with_row_id(2, vec![Value::Integer(2)]))
        .unwrap();
    inserter.finish().unwrap();

    assert_eq!(inserter.failed(), 1);
    assert_eq!(inserter.succeeded(), 1);
}

#[test]
fn test_missing_table_rejects_every_row() {
    let conn = memory("");
    let mut inserter = TableInserter::new(&conn, "ghost", Logger::default());
    for row_id in 1..=3 {
        let err = inserter
            .insert(&Column::with_row_id(row_id, vec![Value::Integer(row_id)]))
            .unwrap_err();
        assert!(matches!(err, RepairError::Discard));
    }
    assert_eq!(inserter.failed(), 3);
    assert!(!inserter.is_prepared());
    inserter.finish().unwrap();
}

#[test]
fn test_large_batches_commit_periodically() {
    let conn = memory("CREATE TABLE t(a);");
    let mut inserter = TableInserter::new(&conn, "t", Logger::default());
    let total = COMMIT_INTERVAL as i64 * 2 + 10;
    for row_id in 1..=total {
        inserter
            .insert(&Column::with_row_id(row_id, vec![Value::Integer(row_id * 2)]))
            .unwrap();
    }
    assert!(!conn.is_autocommit());
    inserter.finish().unwrap();

    let count: i64 = conn
        .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, total);
}

#[test]
fn test_identifiers_are_quoted() {
    assert_eq!(quote_identifier("plain"), "\"plain\"");
    assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
}
