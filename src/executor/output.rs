use bitflags::bitflags;
use rusqlite::Connection;
use serde::Serialize;

use crate::{
    executor::{
        create_table::{CreateTableExecutor, TableCreator},
        insert::TableInserter,
        master::{MasterCollector, MasterInfo},
    },
    session::Session,
    storage::btree::BtreeType,
    types::error::{RepairError, ResultCode, Result},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OutputFlags: u32 {
        /// Assume the destination already has the schema.
        const NO_CREATE_TABLES = 0x0001;
        /// Recover every table found in the catalog.
        const ALL_TABLES = 0x0002;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutputStats {
    /// Rows written plus schema statements executed.
    pub succeeded: u32,
    pub failed: u32,
    pub tables: u32,
    pub indices: u32,
}

/// Copies every recoverable row of `session` into `db`.
///
/// `master` either restricts the output to its table names or, when it was
/// loaded from a snapshot, supplies a catalog the damaged file no longer
/// has. Without one every table is recovered. Fails with `Damaged` when
/// nothing at all could be written.
pub fn output(
    session: &mut Session,
    db: &Connection,
    master: Option<&MasterInfo>,
    flags: OutputFlags,
) -> Result<OutputStats> {
    let logger = session.pager().logger().clone();
    let mut flags = flags;
    let mut master = match master {
        Some(info) => info.clone(),
        None => {
            flags |= OutputFlags::ALL_TABLES;
            MasterInfo::new()
        }
    };
    logger.info(
        ResultCode::Ok,
        format_args!(
            "Output recovered data to '{}', flags 0x{:04x}",
            db.path().unwrap_or(":memory:"),
            flags.bits()
        ),
    );

    let recursive = session.recursive();
    session.set_recursive(false);
    let parsed = {
        let mut collector = MasterCollector::new(&mut master, flags.contains(OutputFlags::ALL_TABLES));
        session.parse_page_with(1, &mut collector)
    };
    session.set_recursive(recursive);

    let mut stats = OutputStats::default();
    for entry in master.values() {
        match entry.kind {
            BtreeType::Table => stats.tables += 1,
            BtreeType::Index => stats.indices += 1,
            _ => {}
        }
    }
    match parsed {
        Err(err) => logger.warn(err.code(), format_args!("Failed to parse sqlite_master.")),
        Ok(()) => logger.info(
            ResultCode::Ok,
            format_args!(
                "Parsed sqlite_master. [table/index: {}]",
                stats.tables + stats.indices
            ),
        ),
    };

    let create = !flags.contains(OutputFlags::NO_CREATE_TABLES);
    let mut creator = CreateTableExecutor::new(db, logger.clone());

    for (name, entry) in master.iter().filter(|(_, e)| e.kind == BtreeType::Table) {
        if create {
            // Failures are counted by the creator.
            let _ = creator.create(name, entry);
        }
        if entry.root_page == 0 {
            continue;
        }

        logger.info(
            ResultCode::Ok,
            format_args!("[{name}] -> pgno: {}", entry.root_page),
        );
        let mut inserter = TableInserter::new(db, name.as_str(), logger.clone());
        if let Err(err) = session.parse_page_with(entry.root_page, &mut inserter) {
            logger.warn(
                err.code(),
                format_args!(
                    "Failed to parse B-tree with root page {}.",
                    entry.root_page
                ),
            );
        }
        if let Err(err) = inserter.finish() {
            logger.warn(
                err.code(),
                format_args!("Failed to commit rows of '{name}': {err}"),
            );
        }
        stats.succeeded += inserter.succeeded();
        stats.failed += inserter.failed();
    }

    if create {
        for (name, entry) in master.iter().filter(|(_, e)| e.kind == BtreeType::Index) {
            let _ = creator.create(name, entry);
        }
    }

    let (created, create_failed) = creator.counts();
    stats.succeeded += created;
    stats.failed += create_failed;

    if stats.succeeded == 0 {
        if master.is_empty() {
            logger.error(
                ResultCode::Damaged,
                format_args!("No valid sqlite_master info available, sqlite_master is corrupted."),
            );
        } else {
            logger.error(
                ResultCode::Damaged,
                format_args!("No rows can be successfully output. [failed: {}]", stats.failed),
            );
        }
        return Err(RepairError::damaged("no rows recovered"));
    }

    logger.info(
        ResultCode::Ok,
        format_args!(
            "Recovery output finished. [succeeded: {}, failed: {}]",
            stats.succeeded, stats.failed
        ),
    );
    Ok(stats)
}
