//! Fixtures for tests and benchmarks: throwaway database files built with
//! real SQLite, byte-level page surgery, and a log sink that records output.

use std::{
    fs::{self, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use rusqlite::Connection;
use tempfile::TempDir;

use crate::{
    types::{
        CELL_POINTER_SIZE, PageNo,
        error::{ResultCode, Result},
        page::header_offset,
    },
    utils::{
        log::{LogLevel, LogSink, Logger},
        varint::read_u16,
    },
};

/// A database file inside its own temporary directory. Both are removed on drop.
pub struct TempDatabase {
    dir: TempDir,
    pub path: PathBuf,
}

impl TempDatabase {
    pub fn new() -> Result<Self> {
        Self::with_prefix("salvage_test")
    }

    pub fn with_prefix(prefix: &str) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let path = dir.path().join("source.db");
        Ok(Self { dir, path })
    }

    /// Creates the file with the given page size and runs `sql` against it.
    pub fn build(&self, page_size: usize, sql: &str) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(&format!("PRAGMA page_size = {page_size}; VACUUM;"))?;
        conn.execute_batch(sql)?;
        conn.close().map_err(|(_, err)| err)?;
        Ok(())
    }

    pub fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    /// A path next to the source file, for output databases or snapshots.
    pub fn sibling(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Root page of a table or index, read from the intact catalog.
    pub fn root_page(&self, name: &str) -> Result<PageNo> {
        let conn = self.connection()?;
        let root: i64 = conn.query_row(
            "SELECT rootpage FROM sqlite_master WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(root as PageNo)
    }

    pub fn file_len(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    pub fn read_page(&self, pgno: PageNo, page_size: usize) -> Result<Vec<u8>> {
        let mut file = fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start((pgno as u64 - 1) * page_size as u64))?;
        let mut data = vec![0u8; page_size];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    pub fn write_page(&self, pgno: PageNo, data: &[u8]) -> Result<()> {
        self.patch((pgno as u64 - 1) * data.len() as u64, data)
    }

    /// Overwrites `bytes` at an absolute file offset.
    pub fn patch(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Cuts the file down to `len` bytes.
    pub fn truncate(&self, len: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        Ok(())
    }
}

/// Offsets of the cells on a B-tree page, in pointer-array order.
pub fn cell_offsets(page: &[u8], pgno: PageNo) -> Result<Vec<usize>> {
    let header = header_offset(pgno);
    let interior = matches!(page.get(header), Some(2 | 5));
    let array = header + if interior { 12 } else { 8 };
    let cells = read_u16(page, header + 3)? as usize;
    (0..cells)
        .map(|i| read_u16(page, array + i * CELL_POINTER_SIZE).map(usize::from))
        .collect()
}

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub code: ResultCode,
    pub message: String,
}

/// Keeps every message in memory so tests can assert on diagnostics.
#[derive(Debug, Default)]
pub struct CapturingSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CapturingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn logger(self: &Arc<Self>) -> Logger {
        Logger::new(self.clone())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|record| record.message.contains(needle))
    }
}

impl LogSink for CapturingSink {
    fn log(&self, level: LogLevel, code: ResultCode, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                level,
                code,
                message: message.to_string(),
            });
        }
    }
}
