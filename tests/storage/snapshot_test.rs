use std::fs;

use salvage::{
    executor::master::MasterEntry,
    load_master, save_master,
    storage::{btree::BtreeType, snapshot::SNAPSHOT_HEADER_SIZE},
    types::error::{RepairError, ResultCode},
    utils::mock::TempDatabase,
};

const NO_TABLES: &[&str] = &[];

fn fixture(prefix: &str) -> TempDatabase {
    let db = TempDatabase::with_prefix(prefix).unwrap();
    db.build(
        1024,
        "CREATE TABLE users(id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT UNIQUE);
         CREATE INDEX users_name ON users(name);
         CREATE TABLE posts(id INTEGER PRIMARY KEY, user INTEGER, body TEXT);
         CREATE VIEW recent AS SELECT * FROM posts;
         INSERT INTO users(name) VALUES ('ada');",
    )
    .unwrap();
    db
}

#[test]
fn test_save_and_load_round_trip() {
    let db = fixture("snapshot_round_trip");
    let out = db.sibling("master.bin");
    let conn = db.connection().unwrap();

    let saved = save_master(&conn, &out, Some(b"k3y")).unwrap();
    // sqlite_sequence and the unique autoindex are skipped, and so is the view.
    assert_eq!(saved, 3);

    let (master, salt) = load_master(&out, Some(b"k3y"), NO_TABLES).unwrap();
    assert_eq!(master.len(), 3);
    assert_eq!(
        master.get("users"),
        Some(&MasterEntry::new(
            BtreeType::Table,
            "CREATE TABLE users(id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT UNIQUE)",
            db.root_page("users").unwrap(),
        ))
    );
    assert_eq!(master["users_name"].kind, BtreeType::Index);
    assert_eq!(master["posts"].root_page, db.root_page("posts").unwrap());
    assert!(!master.contains_key("recent"));

    let file = fs::read(&db.path).unwrap();
    assert_eq!(&salt[..], &file[..16]);
}

#[test]
fn test_header_layout() {
    let db = fixture("snapshot_header");
    let out = db.sibling("master.bin");
    save_master(&db.connection().unwrap(), &out, None).unwrap();

    let bytes = fs::read(&out).unwrap();
    assert!(bytes.len() > SNAPSHOT_HEADER_SIZE);
    assert_eq!(&bytes[..6], b"\0dBmSt");
    assert_eq!(&bytes[6..8], &1u16.to_le_bytes());
    assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
    assert_eq!(&bytes[12..28], b"SQLite format 3\0");
}

#[test]
fn test_allow_list_filters_by_owning_table() {
    let db = fixture("snapshot_filter");
    let out = db.sibling("master.bin");
    save_master(&db.connection().unwrap(), &out, None).unwrap();

    let (master, _) = load_master(&out, None, &["users", "missing"]).unwrap();
    let mut names: Vec<&str> = master.keys().map(String::as_str).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["missing", "users", "users_name"]);
    assert_eq!(master["missing"], MasterEntry::placeholder());
    assert_eq!(master["users"].kind, BtreeType::Table);
}

#[test]
fn test_wrong_key_is_damaged() {
    let db = fixture("snapshot_wrong_key");
    let out = db.sibling("master.bin");
    save_master(&db.connection().unwrap(), &out, Some(b"right")).unwrap();

    let err = load_master(&out, Some(b"wrong"), NO_TABLES).unwrap_err();
    assert_eq!(err.code(), ResultCode::Damaged);
    let err = load_master(&out, None, NO_TABLES).unwrap_err();
    assert_eq!(err.code(), ResultCode::Damaged);
}

#[test]
fn test_bad_magic_is_damaged() {
    let db = fixture("snapshot_magic");
    let out = db.sibling("master.bin");
    save_master(&db.connection().unwrap(), &out, None).unwrap();

    let mut bytes = fs::read(&out).unwrap();
    bytes[1] = b'X';
    fs::write(&out, &bytes).unwrap();
    let err = load_master(&out, None, NO_TABLES).unwrap_err();
    assert!(matches!(err, RepairError::Snapshot(_)));
    assert_eq!(err.code(), ResultCode::Damaged);

    bytes[1] = b'd';
    bytes[6] = 2;
    fs::write(&out, &bytes).unwrap();
    assert!(load_master(&out, None, NO_TABLES).unwrap_err().is_damaged());
}

#[test]
fn test_truncated_body_is_damaged() {
    let db = fixture("snapshot_truncated");
    let out = db.sibling("master.bin");
    save_master(&db.connection().unwrap(), &out, None).unwrap();

    let bytes = fs::read(&out).unwrap();
    fs::write(&out, &bytes[..SNAPSHOT_HEADER_SIZE + 8]).unwrap();
    assert!(load_master(&out, None, NO_TABLES).unwrap_err().is_damaged());
}

#[test]
fn test_overstated_count_is_damaged() {
    let db = fixture("snapshot_count");
    let out = db.sibling("master.bin");
    save_master(&db.connection().unwrap(), &out, None).unwrap();

    let mut bytes = fs::read(&out).unwrap();
    bytes[8..12].copy_from_slice(&4u32.to_le_bytes());
    fs::write(&out, &bytes).unwrap();
    assert!(load_master(&out, None, NO_TABLES).unwrap_err().is_damaged());
}

#[test]
fn test_missing_snapshot_cannot_open() {
    let db = TempDatabase::with_prefix("snapshot_missing").unwrap();
    let err = load_master(db.sibling("none.bin"), None, NO_TABLES).unwrap_err();
    assert_eq!(err.code(), ResultCode::CantOpen);
}

#[test]
fn test_overlong_names_are_rejected() {
    let db = TempDatabase::with_prefix("snapshot_long").unwrap();
    let name = "t".repeat(300);
    db.build(1024, &format!("CREATE TABLE {name}(x);")).unwrap();

    let err = save_master(&db.connection().unwrap(), db.sibling("m.bin"), None).unwrap_err();
    assert_eq!(err.code(), ResultCode::IoErr);
}
