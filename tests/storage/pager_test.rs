use salvage::{
    storage::{
        codec::CipherConfig,
        pager::{Integrity, Pager, is_valid_page_size},
    },
    types::{
        error::{RepairError, ResultCode},
        page::{PageStatus, PageType},
    },
    utils::{
        log::Logger,
        mock::{CapturingSink, TempDatabase},
    },
};

fn fixture(prefix: &str) -> TempDatabase {
    let db = TempDatabase::with_prefix(prefix).unwrap();
    db.build(
        1024,
        "CREATE TABLE people(id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO people(name) VALUES ('ada'), ('grace'), ('edsger');",
    )
    .unwrap();
    db
}

#[test]
fn test_open_reads_geometry_from_header() {
    let db = fixture("pager_geometry");
    let pager = Pager::open(&db.path, None, Logger::default()).unwrap();

    assert_eq!(pager.page_size(), 1024);
    assert_eq!(pager.reserved_bytes(), 0);
    assert_eq!(pager.usable_size(), 1024);
    assert_eq!(u64::from(pager.page_count()), db.file_len().unwrap() / 1024);
    assert!(pager.integrity().contains(Integrity::HEADER | Integrity::KDF_SALT));
    assert!(!pager.integrity().contains(Integrity::DATA));
    assert!(!pager.has_codec());
    assert!(
        pager
            .statuses()
            .iter()
            .all(|status| *status == PageStatus::Unchecked)
    );
}

#[test]
fn test_missing_file_cannot_be_opened() {
    let db = TempDatabase::with_prefix("pager_missing").unwrap();
    let err = Pager::open(db.sibling("nope.db"), None, Logger::default()).err().unwrap();
    assert!(matches!(err, RepairError::CantOpen { .. }));
    assert_eq!(err.code(), ResultCode::CantOpen);
}

#[test]
fn test_page_numbers_outside_file_are_misuse() {
    let db = fixture("pager_range");
    let pager = Pager::open(&db.path, None, Logger::default()).unwrap();

    assert_eq!(pager.is_valid_page_number(0).unwrap_err().code(), ResultCode::Misuse);
    assert_eq!(
        pager
            .is_valid_page_number(pager.page_count() + 1)
            .unwrap_err()
            .code(),
        ResultCode::Misuse
    );
    assert!(pager.is_valid_page_number(pager.page_count()).is_ok());
    assert_eq!(pager.status(0), PageStatus::Invalid);
    assert_eq!(pager.status(pager.page_count() + 1), PageStatus::Invalid);
}

#[test]
fn test_acquiring_pages_outside_file_is_misuse() {
    let db = fixture("pager_acquire_range");
    let mut pager = Pager::open(&db.path, None, Logger::default()).unwrap();
    let past_end = pager.page_count() + 1;

    for pgno in [0, past_end] {
        assert_eq!(pager.acquire_page(pgno).unwrap_err().code(), ResultCode::Misuse);
        assert_eq!(
            pager.acquire_overflow_page(pgno).unwrap_err().code(),
            ResultCode::Misuse
        );
        assert_eq!(
            pager.acquire_page_type(pgno).unwrap_err().code(),
            ResultCode::Misuse
        );
    }
    assert_eq!(pager.acquire_page_type(1).unwrap(), PageType::LeafTable);
}

#[test]
fn test_acquire_classifies_pages() {
    let db = fixture("pager_acquire");
    let root = db.root_page("people").unwrap();
    let mut pager = Pager::open(&db.path, None, Logger::default()).unwrap();

    let master = pager.acquire_page(1).unwrap();
    assert_eq!(master.page_type(), PageType::LeafTable);
    assert_eq!(master.header_offset(), 100);
    assert_eq!(master.data().map(<[u8]>::len), Some(1024));

    assert_eq!(pager.acquire_page_type(root).unwrap(), PageType::LeafTable);
    let overflow = pager.acquire_overflow_page(root).unwrap();
    assert_eq!(overflow.page_type(), PageType::Overflow);
}

#[test]
fn test_bad_magic_falls_back_to_defaults() {
    let db = fixture("pager_magic");
    let file_len = db.file_len().unwrap();
    db.patch(0, &[0u8; 16]).unwrap();

    let sink = CapturingSink::new();
    let pager = Pager::open(&db.path, None, sink.logger()).unwrap();

    assert_eq!(pager.page_size(), 4096);
    assert_eq!(u64::from(pager.page_count()), file_len.div_ceil(4096));
    assert!(!pager.integrity().contains(Integrity::HEADER));
    assert!(!pager.integrity().contains(Integrity::KDF_SALT));
    assert!(sink.contains("SQLite format magic corrupted."));
    assert!(sink.contains("Header corrupted."));
}

#[test]
fn test_forced_page_size_is_kept_on_bad_magic() {
    let db = fixture("pager_forced");
    db.patch(0, &[0u8; 16]).unwrap();

    let conf = CipherConfig {
        page_size: Some(1024),
        ..CipherConfig::default()
    };
    let pager = Pager::open(&db.path, Some(&conf), Logger::default()).unwrap();
    assert_eq!(pager.page_size(), 1024);
    assert!(!pager.has_codec());
}

#[test]
fn test_corrupted_page_size_field_uses_default() {
    let db = fixture("pager_page_size");
    db.patch(16, &[0x03, 0x00]).unwrap();

    let sink = CapturingSink::new();
    let pager = Pager::open(&db.path, None, sink.logger()).unwrap();
    assert_eq!(pager.page_size(), 4096);
    assert!(!pager.integrity().contains(Integrity::HEADER));
    assert!(sink.contains("Page size field is corrupted."));
}

#[test]
fn test_oversized_free_page_count_is_reset() {
    let db = fixture("pager_free_count");
    db.patch(36, &0x00ff_ffffu32.to_be_bytes()).unwrap();

    let pager = Pager::open(&db.path, None, Logger::default()).unwrap();
    assert_eq!(pager.free_page_count(), 0);
    assert_eq!(pager.valid_page_count(), pager.page_count());
    assert!(!pager.integrity().contains(Integrity::HEADER));
}

#[test]
fn test_truncated_header_aborts_open() {
    let db = fixture("pager_truncated");
    db.truncate(40).unwrap();

    let err = Pager::open(&db.path, None, Logger::default()).err().unwrap();
    assert_eq!(err.code(), ResultCode::ShortRead);
}

#[test]
fn test_status_updates_drive_counters() {
    let db = fixture("pager_status");
    let mut pager = Pager::open(&db.path, None, Logger::default()).unwrap();

    pager.set_status(1, PageStatus::Checked);
    pager.set_status(2, PageStatus::Damaged);
    assert_eq!(pager.status(1), PageStatus::Checked);
    assert_eq!(pager.parsed_page_count(), 1);
    assert!(pager.integrity().contains(Integrity::DATA));

    // Out-of-range updates are ignored.
    pager.set_status(10_000, PageStatus::Checked);
    assert_eq!(pager.parsed_page_count(), 1);
}

#[test]
fn test_page_size_validation() {
    for size in [512, 1024, 4096, 65536] {
        assert!(is_valid_page_size(size));
    }
    for size in [0, 256, 1000, 131072] {
        assert!(!is_valid_page_size(size));
    }
}
