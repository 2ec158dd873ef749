use std::{fmt, io, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Stable integer result codes shared with callers that only speak numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    CantOpen = 1,
    Misuse = 2,
    IoErr = 3,
    NoMem = 4,
    ShortRead = 5,
    Damaged = 6,
    Discard = 7,
}

impl ResultCode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ResultCode::Ok),
            1 => Some(ResultCode::CantOpen),
            2 => Some(ResultCode::Misuse),
            3 => Some(ResultCode::IoErr),
            4 => Some(ResultCode::NoMem),
            5 => Some(ResultCode::ShortRead),
            6 => Some(ResultCode::Damaged),
            7 => Some(ResultCode::Discard),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn description(self) -> &'static str {
        match self {
            ResultCode::Ok => "SQLITERK_OK",
            ResultCode::CantOpen => "SQLITERK_CANTOPEN",
            ResultCode::Misuse => "SQLITERK_MISUSE",
            ResultCode::IoErr => "SQLITERK_IOERR",
            ResultCode::NoMem => "SQLITERK_NOMEM",
            ResultCode::ShortRead => "SQLITERK_SHORT_READ",
            ResultCode::Damaged => "SQLITERK_DAMAGED",
            ResultCode::Discard => "SQLITERK_DISCARD",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Error, Debug)]
pub enum RepairError {
    #[error("Cannot open '{path}': {source}")]
    CantOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Misuse: {0}")]
    Misuse(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Not enough memory, required {required} bytes")]
    NoMem { required: usize },

    #[error("Short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },

    #[error("Damaged: {0}")]
    Damaged(String),

    #[error("Row discarded")]
    Discard,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Master snapshot error: {0}")]
    Snapshot(String),
}

impl RepairError {
    pub fn misuse(details: impl Into<String>) -> Self {
        RepairError::Misuse(details.into())
    }

    pub fn damaged(details: impl Into<String>) -> Self {
        RepairError::Damaged(details.into())
    }

    pub fn code(&self) -> ResultCode {
        match self {
            RepairError::CantOpen { .. } => ResultCode::CantOpen,
            RepairError::Misuse(_) => ResultCode::Misuse,
            RepairError::Io(_) | RepairError::Sqlite(_) => ResultCode::IoErr,
            RepairError::NoMem { .. } => ResultCode::NoMem,
            RepairError::ShortRead { .. } => ResultCode::ShortRead,
            RepairError::Damaged(_) | RepairError::Snapshot(_) => ResultCode::Damaged,
            RepairError::Discard => ResultCode::Discard,
        }
    }

    pub fn is_damaged(&self) -> bool {
        self.code() == ResultCode::Damaged
    }
}

pub type Result<T> = std::result::Result<T, RepairError>;
