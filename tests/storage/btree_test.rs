use salvage::{
    session::{Notify, Session, Table},
    storage::{
        btree::{Btree, BtreeType, NodeLimits},
        pager::Pager,
    },
    types::{
        error::{RepairError, ResultCode, Result},
        page::PageStatus,
        row::Column,
        value::Value,
    },
    utils::{
        log::Logger,
        mock::{TempDatabase, cell_offsets},
    },
};

#[derive(Default)]
struct Collector {
    rows: Vec<(String, Column)>,
    tables: Vec<(String, BtreeType)>,
    damaged: usize,
}

impl Collector {
    fn rows_of(&self, table: &str) -> Vec<&Column> {
        self.rows
            .iter()
            .filter(|(name, _)| name == table)
            .map(|(_, column)| column)
            .collect()
    }
}

impl Notify for Collector {
    fn begin_table(&mut self, table: &Table) {
        self.tables
            .push((table.name().unwrap_or_default().to_string(), table.kind()));
    }

    fn on_column(&mut self, table: &Table, column: &Column) -> Result<()> {
        self.rows
            .push((table.name().unwrap_or_default().to_string(), column.clone()));
        Ok(())
    }

    fn on_damaged_cell(&mut self, _table: &Table, _pgno: u32, _error: &RepairError) {
        self.damaged += 1;
    }
}

fn open(db: &TempDatabase) -> Session {
    Session::open(&db.path, None, Logger::default()).unwrap()
}

#[test]
fn test_catalog_walk_discovers_tables() {
    let db = TempDatabase::with_prefix("btree_discover").unwrap();
    db.build(
        1024,
        "CREATE TABLE notes(id INTEGER PRIMARY KEY, body TEXT, score REAL);
         CREATE INDEX notes_body ON notes(body);
         WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 300)
         INSERT INTO notes SELECT i, 'note number ' || i, i * 0.5 FROM n;",
    )
    .unwrap();

    let mut session = open(&db);
    let mut collector = Collector::default();
    session.parse_page_with(1, &mut collector).unwrap();

    let notes = collector.rows_of("notes");
    assert_eq!(notes.len(), 300);
    let mut ids: Vec<i64> = notes.iter().map(|c| c.row_id()).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=300).collect::<Vec<_>>());

    let row = notes.iter().find(|c| c.row_id() == 42).unwrap();
    assert_eq!(row.get_value(0), Some(&Value::Null));
    assert_eq!(row.text(1), Some("note number 42"));
    assert_eq!(row.number(2), 21.0);

    assert!(collector
        .tables
        .contains(&("sqlite_master".to_string(), BtreeType::Master)));
    assert!(collector
        .tables
        .contains(&("notes".to_string(), BtreeType::Table)));
    assert!(collector
        .tables
        .contains(&("notes_body".to_string(), BtreeType::Index)));
    // Index leaves are walked but never decoded into rows.
    assert!(collector.rows_of("notes_body").is_empty());
    assert_eq!(collector.damaged, 0);

    let root = db.root_page("notes").unwrap();
    assert_eq!(session.pager().status(root), PageStatus::Checked);
    assert!(session.parsed_page_count() > 3);
}

#[test]
fn test_non_recursive_walk_stays_in_catalog() {
    let db = TempDatabase::with_prefix("btree_flat").unwrap();
    db.build(1024, "CREATE TABLE a(x); INSERT INTO a VALUES (1);")
        .unwrap();

    let mut session = open(&db);
    session.set_recursive(false);
    let mut collector = Collector::default();
    session.parse_page_with(1, &mut collector).unwrap();

    assert_eq!(collector.rows_of("sqlite_master").len(), 1);
    assert!(collector.rows_of("a").is_empty());
    assert_eq!(session.pager().status(2), PageStatus::Unchecked);
}

#[test]
fn test_already_parsed_roots_are_skipped() {
    let db = TempDatabase::with_prefix("btree_skip").unwrap();
    db.build(1024, "CREATE TABLE a(x); INSERT INTO a VALUES (1), (2);")
        .unwrap();

    let mut session = open(&db);
    session.parse().unwrap();
    let mut collector = Collector::default();
    session.parse_page_with(2, &mut collector).unwrap();
    assert!(collector.rows.is_empty());
}

#[test]
fn test_out_of_range_roots_are_misuse() {
    let db = TempDatabase::with_prefix("btree_range").unwrap();
    db.build(1024, "CREATE TABLE a(x);").unwrap();

    let mut session = open(&db);
    let count = session.page_count();
    assert_eq!(session.parse_page(0).unwrap_err().code(), ResultCode::Misuse);
    assert_eq!(
        session.parse_page(count + 1).unwrap_err().code(),
        ResultCode::Misuse
    );
}

#[test]
fn test_cell_count_overflow_damages_page() {
    let db = TempDatabase::with_prefix("btree_cells").unwrap();
    db.build(1024, "CREATE TABLE a(x); INSERT INTO a VALUES (1), (2);")
        .unwrap();
    let root = db.root_page("a").unwrap();
    db.patch((root as u64 - 1) * 1024 + 3, &[0xff, 0xff]).unwrap();

    let mut session = open(&db);
    let mut collector = Collector::default();
    let err = session.parse_page_with(root, &mut collector).unwrap_err();
    assert!(err.is_damaged());
    assert_eq!(session.pager().status(root), PageStatus::Damaged);
    assert!(collector.rows.is_empty());
}

#[test]
fn test_invalid_page_type_is_damaged() {
    let db = TempDatabase::with_prefix("btree_type").unwrap();
    db.build(1024, "CREATE TABLE a(x); INSERT INTO a VALUES (1);")
        .unwrap();
    let root = db.root_page("a").unwrap();
    db.patch((root as u64 - 1) * 1024, &[0x07]).unwrap();

    let mut session = open(&db);
    let err = session.parse_page(root).unwrap_err();
    assert!(err.is_damaged());
}

#[test]
fn test_overflow_chain_is_reassembled() {
    let db = TempDatabase::with_prefix("btree_overflow").unwrap();
    db.build(
        1024,
        "CREATE TABLE blobs(v BLOB); INSERT INTO blobs VALUES (randomblob(5000));",
    )
    .unwrap();
    let expected: Vec<u8> = db
        .connection()
        .unwrap()
        .query_row("SELECT v FROM blobs", [], |row| row.get(0))
        .unwrap();

    let mut session = open(&db);
    let mut collector = Collector::default();
    session.parse_page_with(1, &mut collector).unwrap();

    let rows = collector.rows_of("blobs");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].binary(0), Some(expected.as_slice()));
    assert!(rows[0].overflow_pages().len() >= 4);
    for pgno in rows[0].overflow_pages() {
        assert_eq!(session.pager().status(*pgno), PageStatus::Checked);
    }
}

#[test]
fn test_overflow_loop_terminates() {
    let db = TempDatabase::with_prefix("btree_loop").unwrap();
    db.build(
        1024,
        "CREATE TABLE blobs(v BLOB); INSERT INTO blobs VALUES (zeroblob(4000));",
    )
    .unwrap();
    let root = db.root_page("blobs").unwrap();
    let page_count = (db.file_len().unwrap() / 1024) as u32;
    // Every overflow page now points back at itself.
    for pgno in (root + 1)..=page_count {
        db.patch((pgno as u64 - 1) * 1024, &pgno.to_be_bytes()).unwrap();
    }

    let mut session = open(&db);
    let mut collector = Collector::default();
    let err = session.parse_page_with(root, &mut collector).unwrap_err();
    assert!(err.is_damaged());
    assert!(collector.rows.is_empty());
    assert_eq!(collector.damaged, 1);
}

#[test]
fn test_damaged_cell_does_not_stop_siblings() {
    let db = TempDatabase::with_prefix("btree_sibling").unwrap();
    db.build(
        1024,
        "CREATE TABLE t(a INTEGER, b TEXT);
         INSERT INTO t VALUES (10, 'x'), (20, 'y'), (30, 'z');",
    )
    .unwrap();
    let root = db.root_page("t").unwrap();
    let page = db.read_page(root, 1024).unwrap();
    let cells = cell_offsets(&page, root).unwrap();
    // payload size, row id and header length each fit in one byte here.
    db.patch((root as u64 - 1) * 1024 + cells[0] as u64 + 3, &[10])
        .unwrap();

    let mut session = open(&db);
    let mut collector = Collector::default();
    let err = session.parse_page_with(root, &mut collector).unwrap_err();
    assert!(err.is_damaged());
    assert_eq!(collector.rows.len(), 2);
    assert_eq!(collector.damaged, 1);
}

#[test]
fn test_pointer_cycle_back_to_root_terminates() {
    let db = TempDatabase::with_prefix("btree_cycle").unwrap();
    db.build(
        1024,
        "CREATE TABLE t(a INTEGER, b TEXT);
         WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 400)
         INSERT INTO t SELECT i, printf('%040d', i) FROM n;",
    )
    .unwrap();
    let root = db.root_page("t").unwrap();
    let page = db.read_page(root, 1024).unwrap();
    assert_eq!(page[0], 5, "root should be an interior table page");
    db.patch((root as u64 - 1) * 1024 + 8, &root.to_be_bytes())
        .unwrap();

    let mut session = open(&db);
    let mut collector = Collector::default();
    session.parse_page_with(root, &mut collector).unwrap();

    assert!(!collector.rows.is_empty());
    assert!(collector.rows.len() < 400);
    assert_eq!(session.pager().status(root), PageStatus::Checked);
}

#[test]
fn test_system_trees_keep_their_kind() {
    let db = TempDatabase::with_prefix("btree_meta").unwrap();
    db.build(
        1024,
        "CREATE TABLE s(id INTEGER PRIMARY KEY AUTOINCREMENT, v); INSERT INTO s(v) VALUES (1);",
    )
    .unwrap();
    let seq_root = db.root_page("sqlite_sequence").unwrap();

    let mut pager = Pager::open(&db.path, None, Logger::default()).unwrap();
    let mut btree = Btree::open(&mut pager, seq_root).unwrap();
    assert_eq!(btree.kind(), BtreeType::Table);
    btree.set_meta(Some("sqlite_sequence"), BtreeType::Table);
    assert_eq!(btree.kind(), BtreeType::Sequence);
    assert_eq!(btree.set_kind(BtreeType::Table).unwrap_err().code(), ResultCode::Misuse);

    let master = Btree::open(&mut pager, 1).unwrap();
    assert_eq!(master.kind(), BtreeType::Master);
    assert_eq!(master.name(), Some("sqlite_master"));
}

#[test]
fn test_node_limits_for_common_page_sizes() {
    let limits = NodeLimits::new(1024);
    assert_eq!(limits.max_leaf, 989);
    assert_eq!(limits.min_local, 103);
    assert_eq!(limits.local_payload_size(500, 1024), 500);
    assert_eq!(limits.local_payload_size(3003, 1024), 963);

    let limits = NodeLimits::new(4096);
    assert_eq!(limits.max_leaf, 4061);
    assert_eq!(limits.min_local, 489);
}
