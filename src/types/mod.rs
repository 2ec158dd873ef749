pub mod error;
pub mod page;
pub mod row;
pub mod value;

// Common type aliases
pub type PageNo = u32;
pub type RowId = i64;

// Constants following the SQLite file format
pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 65536;
pub const HEADER_SIZE: usize = 100; // Database header size, only on page 1
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const KDF_SALT_SIZE: usize = 16;

pub const MAX_VARINT_LENGTH: usize = 9;
pub const OVERFLOW_POINTER_SIZE: usize = 4; // next page number at the head of overflow pages
pub const CELL_POINTER_SIZE: usize = 2;
