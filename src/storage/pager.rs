use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use bitflags::bitflags;

use crate::{
    storage::{
        codec::{CipherConfig, PageCodec, install_cipher},
        header::{HeaderParse, HeaderPolicy},
    },
    types::{
        DEFAULT_PAGE_SIZE, HEADER_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, PageNo,
        error::{RepairError, ResultCode, Result},
        page::{Page, PageStatus, PageType, header_offset},
    },
    utils::log::Logger,
};

bitflags! {
    /// Which parts of the file were found intact.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Integrity: u32 {
        const HEADER = 0x1;
        const DATA = 0x2;
        const KDF_SALT = 0x4;
    }
}

/// Read-only page source over a possibly damaged database file.
pub struct Pager {
    path: PathBuf,
    file: File,
    file_size: u64,
    page_size: usize,
    reserved_bytes: usize,
    page_count: u32,
    free_page_count: u32,
    integrity: Integrity,
    statuses: Vec<PageStatus>,
    codec: Option<Box<dyn PageCodec>>,
    logger: Logger,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(
        path: P,
        cipher: Option<&CipherConfig>,
        logger: Logger,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| {
            logger.error(
                ResultCode::CantOpen,
                format_args!("Cannot open '{}': {source}", path.display()),
            );
            RepairError::CantOpen {
                path: path.clone(),
                source,
            }
        })?;
        let file_size = file.metadata()?.len();

        let mut pager = Self {
            path,
            file,
            file_size,
            page_size: DEFAULT_PAGE_SIZE,
            reserved_bytes: 0,
            page_count: 0,
            free_page_count: 0,
            integrity: Integrity::empty(),
            statuses: Vec::new(),
            codec: None,
            logger,
        };

        let (cipher, forced_page_size) = match cipher {
            Some(conf) if conf.key.is_none() => (None, conf.page_size.map(|size| size as usize)),
            other => (other, None),
        };

        if let Some(conf) = cipher {
            let mut file_salt = conf.clone();
            file_salt.kdf_salt = None;
            install_cipher(&mut pager, &file_salt)?;
            pager.parse_header(None)?;
            if pager.integrity.contains(Integrity::HEADER) {
                pager.integrity |= Integrity::KDF_SALT;
            } else if conf.kdf_salt.is_some() {
                pager.logger.warn(
                    ResultCode::Damaged,
                    format_args!("Header cannot be decoded correctly. Trying to apply recovery data."),
                );
                install_cipher(&mut pager, conf)?;
                pager.parse_header(None)?;
            }
        } else {
            pager.parse_header(forced_page_size)?;
            if pager.integrity.contains(Integrity::HEADER) {
                pager.integrity |= Integrity::KDF_SALT;
            }
        }

        if pager.integrity.contains(Integrity::HEADER) {
            pager.logger.info(ResultCode::Ok, format_args!("Header checksum OK."));
        } else {
            pager.logger.warn(ResultCode::Damaged, format_args!("Header corrupted."));
        }

        pager.statuses = vec![PageStatus::Unchecked; pager.page_count as usize];
        Ok(pager)
    }

    fn parse_header(&mut self, forced_page_size: Option<usize>) -> Result<()> {
        let policy = match (&self.codec, forced_page_size) {
            (Some(codec), _) => HeaderPolicy::Codec {
                page_size: codec.page_size(),
                reserved: codec.reserved_size(),
            },
            (None, Some(size)) if is_valid_page_size(size) => HeaderPolicy::ForcedPageSize(size),
            _ => HeaderPolicy::Plain,
        };

        let size = if self.codec.is_some() { self.page_size } else { HEADER_SIZE };
        let mut buffer = vec![0u8; size];
        if let Err(err) = self.read_at(0, &mut buffer) {
            match &err {
                RepairError::ShortRead { .. } => {
                    self.logger.error(err.code(), format_args!("File truncated."))
                }
                other => self.logger.error(
                    other.code(),
                    format_args!("Cannot read file '{}': {other}", self.path.display()),
                ),
            };
            self.integrity.remove(Integrity::HEADER);
            return Err(err);
        }

        let mut decoded = true;
        if let Some(codec) = &self.codec {
            if codec.decode_page(1, &mut buffer).is_err() {
                self.logger.warn(
                    ResultCode::Damaged,
                    format_args!("Failed to decode page 1, header corrupted."),
                );
                decoded = false;
            }
        }

        let parsed = HeaderParse::evaluate(
            decoded.then_some(buffer.as_slice()),
            policy,
            self.file_size,
            &self.logger,
        )?;

        self.page_size = parsed.page_size;
        self.reserved_bytes = parsed.reserved_bytes;
        self.page_count = parsed.page_count;
        self.free_page_count = parsed.free_page_count;
        self.integrity.set(Integrity::HEADER, parsed.header_valid);
        Ok(())
    }

    pub(crate) fn set_codec(&mut self, codec: Box<dyn PageCodec>) {
        self.page_size = codec.page_size();
        self.reserved_bytes = codec.reserved_size();
        self.codec = Some(codec);
    }

    pub(crate) fn cant_open(&self, reason: String) -> RepairError {
        RepairError::CantOpen {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, reason),
        }
    }

    /// Fills `buf` from `offset`; a file that ends first is a short read.
    pub(crate) fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled < buf.len() {
            return Err(RepairError::ShortRead {
                offset,
                wanted: buf.len(),
                got: filled,
            });
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn usable_size(&self) -> usize {
        self.page_size - self.reserved_bytes
    }

    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }

    pub fn free_page_count(&self) -> u32 {
        self.free_page_count
    }

    pub fn integrity(&self) -> Integrity {
        self.integrity
    }

    pub fn has_codec(&self) -> bool {
        self.codec.is_some()
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn is_valid_page_number(&self, pgno: PageNo) -> Result<()> {
        if pgno < 1 || pgno > self.page_count {
            return Err(RepairError::misuse(format!(
                "page {pgno} outside [1, {}]",
                self.page_count
            )));
        }
        Ok(())
    }

    fn page_offset(&self, pgno: PageNo) -> u64 {
        (pgno as u64 - 1) * self.page_size as u64
    }

    fn read_page(&mut self, pgno: PageNo) -> Result<Vec<u8>> {
        self.is_valid_page_number(pgno)?;
        let mut data = Vec::new();
        data.try_reserve_exact(self.page_size)
            .map_err(|_| RepairError::NoMem {
                required: self.page_size,
            })?;
        data.resize(self.page_size, 0);
        self.read_at(self.page_offset(pgno), &mut data)?;
        if let Some(codec) = &self.codec {
            if let Err(err) = codec.decode_page(pgno, &mut data) {
                self.logger.error(
                    ResultCode::Damaged,
                    format_args!("Failed to decode page {pgno}: {err}"),
                );
                return Err(RepairError::damaged(format!("page {pgno} cannot be decoded")));
            }
        }
        Ok(data)
    }

    /// Reads, decodes and classifies one page.
    pub fn acquire_page(&mut self, pgno: PageNo) -> Result<Page> {
        let data = self.read_page(pgno)?;
        let page_type = data
            .get(header_offset(pgno))
            .map(|flag| PageType::from_u8(*flag))
            .unwrap_or(PageType::Unknown);
        Ok(Page::new(pgno, data, page_type))
    }

    /// Reads and decodes a page known to hold overflow payload.
    pub fn acquire_overflow_page(&mut self, pgno: PageNo) -> Result<Page> {
        let data = self.read_page(pgno)?;
        Ok(Page::new(pgno, data, PageType::Overflow))
    }

    /// Reads only the B-tree flag byte. Encrypted pages are decoded whole.
    pub fn acquire_page_type(&mut self, pgno: PageNo) -> Result<PageType> {
        self.is_valid_page_number(pgno)?;
        if self.codec.is_some() {
            return Ok(self.acquire_page(pgno)?.page_type());
        }
        let mut flag = [0u8; 1];
        self.read_at(self.page_offset(pgno) + header_offset(pgno) as u64, &mut flag)?;
        Ok(PageType::from_u8(flag[0]))
    }

    pub fn set_status(&mut self, pgno: PageNo, status: PageStatus) {
        if let Some(slot) = pgno
            .checked_sub(1)
            .and_then(|index| self.statuses.get_mut(index as usize))
        {
            *slot = status;
            if status == PageStatus::Checked {
                self.integrity |= Integrity::DATA;
            }
        }
    }

    pub fn status(&self, pgno: PageNo) -> PageStatus {
        pgno.checked_sub(1)
            .and_then(|index| self.statuses.get(index as usize))
            .copied()
            .unwrap_or(PageStatus::Invalid)
    }

    pub fn statuses(&self) -> &[PageStatus] {
        &self.statuses
    }

    pub fn parsed_page_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|status| **status == PageStatus::Checked)
            .count()
    }

    pub fn valid_page_count(&self) -> u32 {
        self.page_count.saturating_sub(self.free_page_count)
    }
}

pub fn is_valid_page_size(size: usize) -> bool {
    size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size)
}
