//! Compact on-disk copy of the catalog, written while the database is
//! healthy and used to drive recovery once its `sqlite_master` is gone.
//!
//! Layout (little-endian): a 28-byte header of magic, version, entry count
//! and the 16-byte KDF salt of the source file, followed by one zlib stream
//! of entries. With a key the compressed bytes are RC4-ciphered as a single
//! keystream.

use std::{
    collections::HashSet,
    fs,
    io::{Read, Write},
    path::Path,
};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use rusqlite::Connection;

use crate::{
    executor::master::{MasterEntry, MasterInfo, make_master},
    storage::btree::BtreeType,
    types::{
        KDF_SALT_SIZE, PageNo,
        error::{RepairError, ResultCode, Result},
    },
    utils::{log::Logger, rc4::Rc4},
};

pub const SNAPSHOT_MAGIC: &[u8; 6] = b"\0dBmSt";
pub const SNAPSHOT_VERSION: u16 = 1;
pub const SNAPSHOT_HEADER_SIZE: usize = 28;

const ENTRY_HEADER_SIZE: usize = 10;
const TYPE_TABLE: u8 = 1;
const TYPE_INDEX: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SnapshotHeader {
    count: u32,
    salt: [u8; KDF_SALT_SIZE],
}

impl SnapshotHeader {
    fn to_bytes(self) -> [u8; SNAPSHOT_HEADER_SIZE] {
        let mut bytes = [0u8; SNAPSHOT_HEADER_SIZE];
        bytes[0..6].copy_from_slice(SNAPSHOT_MAGIC);
        bytes[6..8].copy_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.count.to_le_bytes());
        bytes[12..28].copy_from_slice(&self.salt);
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..SNAPSHOT_HEADER_SIZE)?;
        if &bytes[0..6] != SNAPSHOT_MAGIC
            || u16::from_le_bytes([bytes[6], bytes[7]]) != SNAPSHOT_VERSION
        {
            return None;
        }
        let count = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
        let salt = bytes[12..28].try_into().ok()?;
        Some(Self { count, salt })
    }
}

fn cipher(key: Option<&[u8]>) -> Option<Rc4> {
    key.filter(|key| !key.is_empty()).map(Rc4::new)
}

/// Writes the catalog of the live database `db` to `path`. Returns the number
/// of entries saved.
pub fn save_master<P: AsRef<Path>>(db: &Connection, path: P, key: Option<&[u8]>) -> Result<u32> {
    let logger = Logger::default();
    let path = path.as_ref();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let mut count = 0u32;
    {
        let mut stmt = db.prepare("SELECT * FROM sqlite_master;")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let kind: Option<String> = row.get(0)?;
            let name: String = row.get::<_, Option<String>>(1)?.unwrap_or_default();
            let tbl_name: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
            let root_page: i64 = row.get::<_, Option<i64>>(3)?.unwrap_or_default();
            let sql: String = row.get::<_, Option<String>>(4)?.unwrap_or_default();

            if name.starts_with("sqlite_") {
                continue;
            }
            let kind = match kind.as_deref() {
                Some("table") => TYPE_TABLE,
                Some("index") => TYPE_INDEX,
                _ => continue,
            };
            if name.len() > u8::MAX as usize
                || tbl_name.len() > u8::MAX as usize
                || sql.len() > u16::MAX as usize
            {
                logger.error(
                    ResultCode::IoErr,
                    format_args!("Table/index has name longer than 255: {name}, {tbl_name}"),
                );
                return Err(RepairError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("catalog entry '{name}' too long to save"),
                )));
            }

            let mut entry =
                Vec::with_capacity(ENTRY_HEADER_SIZE + name.len() + tbl_name.len() + sql.len() + 3);
            entry.extend_from_slice(&(root_page as u32).to_le_bytes());
            entry.push(kind);
            entry.push(name.len() as u8);
            entry.push(tbl_name.len() as u8);
            entry.push(0);
            entry.extend_from_slice(&(sql.len() as u16).to_le_bytes());
            for text in [&name, &tbl_name, &sql] {
                entry.extend_from_slice(text.as_bytes());
                entry.push(0);
            }
            encoder.write_all(&entry)?;
            count += 1;
        }
    }
    let mut body = encoder.finish()?;
    if let Some(mut rc4) = cipher(key) {
        rc4.apply(&mut body);
    }

    let header = SnapshotHeader {
        count,
        salt: database_salt(db)?,
    };
    let mut file = fs::File::create(path)?;
    file.write_all(&header.to_bytes())?;
    file.write_all(&body)?;
    file.sync_all()?;

    logger.info(
        ResultCode::Ok,
        format_args!("Saved master info with {count} entries."),
    );
    Ok(count)
}

/// First 16 bytes of the database file. In-memory databases have none and
/// save an all-zero salt.
fn database_salt(db: &Connection) -> Result<[u8; KDF_SALT_SIZE]> {
    let mut salt = [0u8; KDF_SALT_SIZE];
    let Some(path) = db.path().filter(|path| !path.is_empty()) else {
        return Ok(salt);
    };
    let mut file = fs::File::open(path)?;
    file.read_exact(&mut salt)?;
    Ok(salt)
}

/// Reads a snapshot written by [`save_master`].
///
/// A non-empty `tables` keeps only entries owned by those tables, and the
/// names themselves are present in the result even when the snapshot has
/// no entry for them.
pub fn load_master<P: AsRef<Path>, S: AsRef<str>>(
    path: P,
    key: Option<&[u8]>,
    tables: &[S],
) -> Result<(MasterInfo, [u8; KDF_SALT_SIZE])> {
    let logger = Logger::default();
    let path = path.as_ref();
    let fail = |details: String| {
        logger.error(
            ResultCode::Damaged,
            format_args!("Cannot load master table: {details}"),
        );
        RepairError::Snapshot(details)
    };

    let mut bytes = fs::read(path).map_err(|source| RepairError::CantOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let header = SnapshotHeader::from_bytes(&bytes)
        .ok_or_else(|| fail(format!("Invalid format: {}", path.display())))?;

    let body = &mut bytes[SNAPSHOT_HEADER_SIZE..];
    if let Some(mut rc4) = cipher(key) {
        rc4.apply(body);
    }

    let filter: Option<HashSet<&str>> =
        (!tables.is_empty()).then(|| tables.iter().map(|name| name.as_ref()).collect());
    let mut master = make_master(tables).unwrap_or_default();

    let mut decoder = ZlibDecoder::new(&*body);
    for _ in 0..header.count {
        let mut fixed = [0u8; ENTRY_HEADER_SIZE];
        decoder
            .read_exact(&mut fixed)
            .map_err(|e| fail(e.to_string()))?;
        let root_page = PageNo::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);
        let kind = match fixed[4] {
            TYPE_TABLE => BtreeType::Table,
            TYPE_INDEX => BtreeType::Index,
            _ => BtreeType::Unknown,
        };
        let name_len = fixed[5] as usize;
        let tbl_name_len = fixed[6] as usize;
        let sql_len = u16::from_le_bytes([fixed[8], fixed[9]]) as usize;

        let mut strings = vec![0u8; name_len + tbl_name_len + sql_len + 3];
        decoder
            .read_exact(&mut strings)
            .map_err(|e| fail(e.to_string()))?;

        let name_end = name_len;
        let tbl_start = name_end + 1;
        let tbl_end = tbl_start + tbl_name_len;
        let sql_start = tbl_end + 1;
        let sql_end = sql_start + sql_len;
        if strings[name_end] != 0 || strings[tbl_end] != 0 || strings[sql_end] != 0 {
            return Err(fail("Invalid string. File corrupted.".to_string()));
        }
        let name = String::from_utf8_lossy(&strings[..name_end]);
        let tbl_name = String::from_utf8_lossy(&strings[tbl_start..tbl_end]);
        let sql = String::from_utf8_lossy(&strings[sql_start..sql_end]);

        if filter
            .as_ref()
            .is_none_or(|filter| filter.contains(&*tbl_name))
        {
            master.insert(name.into_owned(), MasterEntry::new(kind, sql, root_page));
        }
    }

    // Draining verifies the stream checksum; anything left over is corruption.
    let mut rest = Vec::new();
    decoder
        .read_to_end(&mut rest)
        .map_err(|e| fail(e.to_string()))?;
    if !rest.is_empty() {
        return Err(fail(format!("{} bytes past the last entry", rest.len())));
    }

    logger.info(
        ResultCode::Ok,
        format_args!("Loaded master info with {} valid entries.", master.len()),
    );
    Ok((master, header.salt))
}
