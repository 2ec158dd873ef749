use crate::{
    types::{
        DEFAULT_PAGE_SIZE, HEADER_SIZE, MIN_PAGE_SIZE, SQLITE_MAGIC,
        error::{RepairError, ResultCode, Result},
    },
    utils::{
        log::Logger,
        varint::{read_int, read_u16},
    },
};

/// The fields of the 100-byte file header the recovery walk depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub magic: [u8; 16],
    pub page_size: u16,
    pub reserved_space: u8,
    pub database_size_pages: u32,
    pub freelist_trunk_page: u32,
    pub freelist_pages_count: i32,
    pub text_encoding: u32,
}

impl Default for DatabaseHeader {
    fn default() -> Self {
        Self {
            magic: *SQLITE_MAGIC,
            page_size: DEFAULT_PAGE_SIZE as u16,
            reserved_space: 0,
            database_size_pages: 1,
            freelist_trunk_page: 0,
            freelist_pages_count: 0,
            text_encoding: 1,
        }
    }
}

impl DatabaseHeader {
    /// Serializes into a full 100-byte header; fields not modelled are zero
    /// apart from the payload fractions, which SQLite requires.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; HEADER_SIZE];
        buffer[..16].copy_from_slice(&self.magic);
        buffer[16..18].copy_from_slice(&self.page_size.to_be_bytes());
        buffer[18] = 1;
        buffer[19] = 1;
        buffer[20] = self.reserved_space;
        buffer[21] = 64;
        buffer[22] = 32;
        buffer[23] = 32;
        buffer[28..32].copy_from_slice(&self.database_size_pages.to_be_bytes());
        buffer[32..36].copy_from_slice(&self.freelist_trunk_page.to_be_bytes());
        buffer[36..40].copy_from_slice(&self.freelist_pages_count.to_be_bytes());
        buffer[56..60].copy_from_slice(&self.text_encoding.to_be_bytes());
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(RepairError::ShortRead {
                offset: 0,
                wanted: HEADER_SIZE,
                got: bytes.len(),
            });
        }
        let mut magic = [0u8; 16];
        magic.copy_from_slice(&bytes[..16]);
        Ok(Self {
            magic,
            page_size: read_u16(bytes, 16)?,
            reserved_space: bytes[20],
            database_size_pages: read_int(&bytes[28..], 4)? as u32,
            freelist_trunk_page: read_int(&bytes[32..], 4)? as u32,
            freelist_pages_count: read_int(&bytes[36..], 4)? as i32,
            text_encoding: read_int(&bytes[56..], 4)? as u32,
        })
    }

    pub fn has_valid_magic(&self) -> bool {
        &self.magic == SQLITE_MAGIC
    }

    /// Page size with the `1 == 65536` encoding resolved.
    pub fn decoded_page_size(&self) -> usize {
        if self.page_size == 1 {
            65536
        } else {
            self.page_size as usize
        }
    }
}

/// How the page size and reserved bytes were fixed before the header was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPolicy {
    /// Geometry comes from the header.
    Plain,
    /// A plaintext file whose page size is forced by configuration.
    ForcedPageSize(usize),
    /// A codec fixed both values; the header can only confirm them.
    Codec { page_size: usize, reserved: usize },
}

/// Geometry derived from a header, with each field validated on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderParse {
    pub page_size: usize,
    pub reserved_bytes: usize,
    pub free_page_count: u32,
    pub page_count: u32,
    pub header_valid: bool,
}

impl HeaderParse {
    /// Validates a decoded header. `bytes` is `None` when the header could not
    /// be decoded at all, which leaves the policy geometry untouched.
    pub fn evaluate(
        bytes: Option<&[u8]>,
        policy: HeaderPolicy,
        file_size: u64,
        logger: &Logger,
    ) -> Result<Self> {
        let (mut page_size, mut reserved_bytes) = match policy {
            HeaderPolicy::Plain => (DEFAULT_PAGE_SIZE, 0),
            HeaderPolicy::ForcedPageSize(size) => (size, 0),
            HeaderPolicy::Codec { page_size, reserved } => (page_size, reserved),
        };
        let mut header_valid = bytes.is_some();
        let mut free_count: i64 = 0;

        if let Some(bytes) = bytes {
            let header = DatabaseHeader::from_bytes(bytes)?;
            if header.has_valid_magic() {
                let declared = header.decoded_page_size();
                match policy {
                    HeaderPolicy::Plain => {
                        if !declared.is_power_of_two() || declared < MIN_PAGE_SIZE {
                            logger.warn(
                                ResultCode::Damaged,
                                format_args!(
                                    "Page size field is corrupted. Default page size {DEFAULT_PAGE_SIZE} is used"
                                ),
                            );
                            page_size = DEFAULT_PAGE_SIZE;
                            header_valid = false;
                        } else {
                            page_size = declared;
                        }
                    }
                    HeaderPolicy::ForcedPageSize(_) | HeaderPolicy::Codec { .. } => {
                        if declared != page_size {
                            logger.warn(
                                ResultCode::Damaged,
                                format_args!(
                                    "Invalid page size: {page_size} expected, {declared} returned."
                                ),
                            );
                            header_valid = false;
                        }
                    }
                }

                free_count = i64::from(header.freelist_pages_count);

                let reserved = header.reserved_space as usize;
                if let HeaderPolicy::Codec { .. } = policy {
                    if reserved != reserved_bytes {
                        logger.warn(
                            ResultCode::Damaged,
                            format_args!(
                                "Reserved bytes field doesn't match. {reserved_bytes} expected, {reserved} returned."
                            ),
                        );
                        header_valid = false;
                    }
                } else {
                    reserved_bytes = reserved;
                }
            } else {
                logger.warn(ResultCode::Damaged, format_args!("SQLite format magic corrupted."));
                header_valid = false;
            }
        }

        if reserved_bytes >= page_size {
            logger.warn(
                ResultCode::Damaged,
                format_args!("The [reserved bytes] field is corrupted. 0 is used"),
            );
            reserved_bytes = 0;
            header_valid = false;
        }

        let page_count = file_size.div_ceil(page_size as u64);
        if page_count < 1 {
            logger.error(ResultCode::Damaged, format_args!("File truncated."));
            return Err(RepairError::damaged("file holds no pages"));
        }
        let page_count = u32::try_from(page_count)
            .map_err(|_| RepairError::damaged(format!("page count {page_count} out of range")))?;

        if free_count < 0 || free_count > i64::from(page_count) {
            logger.warn(
                ResultCode::Damaged,
                format_args!("The [free page count] field is corrupted. 0 is used"),
            );
            free_count = 0;
            header_valid = false;
        }

        Ok(Self {
            page_size,
            reserved_bytes,
            free_page_count: free_count as u32,
            page_count,
            header_valid,
        })
    }

    pub fn usable_size(&self) -> usize {
        self.page_size - self.reserved_bytes
    }
}
