use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    storage::{pager::Pager, record::decode_record},
    types::{
        CELL_POINTER_SIZE, OVERFLOW_POINTER_SIZE, PageNo,
        error::{RepairError, ResultCode, Result},
        page::{Page, PageType},
        row::Column,
    },
    utils::varint::{read_u16, read_u32, read_varint},
};

/// Catalog classification of a B-tree. Positive values are the reserved
/// system trees; their leaves are never decoded except for the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BtreeType {
    Index = -2,
    Table = -1,
    Unknown = 0,
    Sequence = 1,
    AutoIndex = 2,
    Stat = 3,
    Master = 4,
}

impl BtreeType {
    const SYSTEM: [BtreeType; 4] = [
        BtreeType::Sequence,
        BtreeType::AutoIndex,
        BtreeType::Stat,
        BtreeType::Master,
    ];

    pub fn is_system(&self) -> bool {
        (*self as i32) >= 1
    }

    pub fn name(&self) -> &'static str {
        match self {
            BtreeType::Index => "index",
            BtreeType::Table => "table",
            BtreeType::Unknown => "unknown",
            BtreeType::Sequence => "sqlite_sequence",
            BtreeType::AutoIndex => "sqlite_autoindex",
            BtreeType::Stat => "sqlite_stat",
            BtreeType::Master => "sqlite_master",
        }
    }

    /// Maps the `type` column of a catalog row.
    pub fn from_catalog_type(text: &str) -> Self {
        if text.starts_with("table") {
            BtreeType::Table
        } else if text.starts_with("index") {
            BtreeType::Index
        } else {
            BtreeType::Unknown
        }
    }

    fn system_for_name(name: &str) -> Option<Self> {
        Self::SYSTEM
            .into_iter()
            .find(|kind| name.starts_with(kind.name()))
    }
}

/// Local-storage thresholds derived from the usable page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLimits {
    pub max_local: usize,
    pub min_local: usize,
    pub max_leaf: usize,
    pub min_leaf: usize,
}

impl NodeLimits {
    pub fn new(usable_size: usize) -> Self {
        let base = usable_size.saturating_sub(12);
        Self {
            max_local: (base * 64 / 255).saturating_sub(23),
            min_local: (base * 32 / 255).saturating_sub(23),
            max_leaf: usable_size.saturating_sub(35),
            min_leaf: (base * 32 / 255).saturating_sub(23),
        }
    }

    /// Bytes of a table-leaf payload of `size` bytes stored on the page itself.
    pub fn local_payload_size(&self, size: usize, usable_size: usize) -> usize {
        if size <= self.max_leaf {
            return size;
        }
        let chunk = usable_size.saturating_sub(4).max(1);
        let surplus = self.min_local + (size - self.min_local) % chunk;
        if surplus <= self.max_leaf {
            surplus
        } else {
            self.min_local
        }
    }
}

/// Callbacks fired while a B-tree is walked.
///
/// `begin_page` returning an error cancels that page and its subtree only.
pub trait BtreeVisitor {
    fn begin_btree(&mut self, _pager: &mut Pager, _btree: &Btree) {}

    fn end_btree(&mut self, _pager: &mut Pager, _btree: &Btree, _result: &Result<()>) {}

    fn begin_page(&mut self, _pager: &mut Pager, _btree: &Btree, _pgno: PageNo) -> Result<()> {
        Ok(())
    }

    fn end_page(&mut self, _pager: &mut Pager, _btree: &Btree, _pgno: PageNo, _result: &Result<()>) {}

    fn on_column(&mut self, _pager: &mut Pager, _btree: &Btree, _pgno: PageNo, _column: &Column) {}

    fn on_cell_error(
        &mut self,
        _pager: &mut Pager,
        _btree: &Btree,
        _pgno: PageNo,
        _cell: usize,
        _error: &RepairError,
    ) {
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Btree {
    root: PageNo,
    name: Option<String>,
    kind: BtreeType,
    limits: NodeLimits,
}

impl Btree {
    /// Opens the tree rooted at `root`, inferring its kind from the root page.
    pub fn open(pager: &mut Pager, root: PageNo) -> Result<Self> {
        let page = pager.acquire_page(root)?;
        let limits = NodeLimits::new(pager.usable_size());
        let mut btree = Self {
            root,
            name: None,
            kind: BtreeType::Unknown,
            limits,
        };
        if root == 1 {
            btree.set_meta(Some("sqlite_master"), BtreeType::Master);
        } else {
            btree.kind = match page.page_type() {
                PageType::InteriorIndex | PageType::LeafIndex => BtreeType::Index,
                PageType::InteriorTable | PageType::LeafTable => BtreeType::Table,
                other => {
                    return Err(RepairError::damaged(format!(
                        "root page {root} is {}",
                        other.name()
                    )));
                }
            };
        }
        Ok(btree)
    }

    pub fn root(&self) -> PageNo {
        self.root
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> BtreeType {
        self.kind
    }

    pub fn limits(&self) -> &NodeLimits {
        &self.limits
    }

    /// Names the tree. A name with a reserved prefix forces the matching
    /// system kind, and a system kind is never replaced by a user one.
    pub fn set_meta(&mut self, name: Option<&str>, kind: BtreeType) {
        self.name = name.map(str::to_string);
        if let Some(system) = name.and_then(BtreeType::system_for_name) {
            self.kind = system;
        }
        if !self.kind.is_system() && kind != BtreeType::Unknown {
            self.kind = kind;
        }
    }

    pub fn set_kind(&mut self, kind: BtreeType) -> Result<()> {
        if self.kind.is_system() {
            return Err(RepairError::misuse(format!(
                "cannot retag system tree {}",
                self.kind.name()
            )));
        }
        self.kind = kind;
        Ok(())
    }

    pub fn parse(&self, pager: &mut Pager, visitor: &mut dyn BtreeVisitor) -> Result<()> {
        visitor.begin_btree(pager, self);
        let result = self.parse_page(pager, visitor, self.root);
        visitor.end_btree(pager, self, &result);
        result
    }

    pub fn parse_page(
        &self,
        pager: &mut Pager,
        visitor: &mut dyn BtreeVisitor,
        pgno: PageNo,
    ) -> Result<()> {
        pager.is_valid_page_number(pgno)?;
        visitor.begin_page(pager, self, pgno)?;

        let result = self.walk_page(pager, visitor, pgno);

        visitor.end_page(pager, self, pgno, &result);
        if let Err(err) = &result {
            pager
                .logger()
                .debug(err.code(), format_args!("Failed to parse page {pgno}: {err}"));
        }
        result
    }

    fn walk_page(
        &self,
        pager: &mut Pager,
        visitor: &mut dyn BtreeVisitor,
        pgno: PageNo,
    ) -> Result<()> {
        let mut page = pager.acquire_page(pgno)?;
        let page_type = page.page_type();
        if !page_type.is_btree() {
            pager
                .logger()
                .warn(ResultCode::Damaged, format_args!("Page {pgno} has invalid type"));
            return Err(RepairError::damaged(format!("page {pgno} has invalid type")));
        }

        let header = page.header_offset();
        let data = page
            .data()
            .ok_or_else(|| RepairError::misuse(format!("page {pgno} has no data")))?;
        let cells = read_u16(data, header + 3)? as usize;
        let array_start = header + page_type.btree_header_size();
        if cells == 0 || array_start + cells * CELL_POINTER_SIZE > pager.page_size() {
            return Err(RepairError::damaged(format!(
                "page {pgno} declares {cells} cells"
            )));
        }
        let pointers = (0..cells)
            .map(|i| read_u16(data, array_start + i * CELL_POINTER_SIZE).map(usize::from))
            .collect::<Result<Vec<_>>>()?;

        match page_type {
            PageType::InteriorIndex | PageType::InteriorTable => {
                let mut children = Vec::with_capacity(cells + 1);
                for pointer in &pointers {
                    match read_u32(data, *pointer) {
                        Ok(child) => children.push(child),
                        Err(_) => {
                            pager.logger().debug(
                                ResultCode::Damaged,
                                format_args!("Cell pointer {pointer} on page {pgno} out of range"),
                            );
                        }
                    }
                }
                children.push(read_u32(data, header + 8)?);
                page.clear_data();
                for child in children {
                    // Child failures are recorded on the child page.
                    let _ = self.parse_page(pager, visitor, child);
                }
                Ok(())
            }
            PageType::LeafTable => {
                if self.kind.is_system() && self.kind != BtreeType::Master {
                    return Ok(());
                }
                self.parse_cells(pager, visitor, &page, &pointers)
            }
            _ => Ok(()),
        }
    }

    fn parse_cells(
        &self,
        pager: &mut Pager,
        visitor: &mut dyn BtreeVisitor,
        page: &Page,
        pointers: &[usize],
    ) -> Result<()> {
        let pgno = page.pgno();
        let data = page
            .data()
            .ok_or_else(|| RepairError::misuse(format!("page {pgno} has no data")))?;
        let mut column = Column::new();
        let mut damaged = 0usize;

        for (cell, offset) in pointers.iter().enumerate() {
            column.clear();
            match self.parse_cell(pager, visitor, data, *offset, &mut column) {
                Ok(()) => visitor.on_column(pager, self, pgno, &column),
                Err(err @ RepairError::NoMem { .. }) => return Err(err),
                Err(err) => {
                    pager.logger().debug(
                        err.code(),
                        format_args!("Failed to parse payload of cell {cell} on page {pgno}: {err}"),
                    );
                    visitor.on_cell_error(pager, self, pgno, cell, &err);
                    damaged += 1;
                }
            }
        }

        if damaged > 0 {
            return Err(RepairError::damaged(format!(
                "{damaged} of {} cells on page {pgno} are damaged",
                pointers.len()
            )));
        }
        Ok(())
    }

    fn parse_cell(
        &self,
        pager: &mut Pager,
        visitor: &mut dyn BtreeVisitor,
        data: &[u8],
        offset: usize,
        column: &mut Column,
    ) -> Result<()> {
        let cell = data
            .get(offset..)
            .ok_or_else(|| RepairError::damaged(format!("cell offset {offset} out of range")))?;
        let (payload_size, size_len) = read_varint(cell)?;
        let (row_id, row_id_len) = read_varint(&cell[size_len..])?;
        column.set_row_id(row_id);
        if payload_size <= 0 {
            return Err(RepairError::misuse(format!("payload size {payload_size}")));
        }

        let payload = self.assemble_payload(
            pager,
            visitor,
            data,
            offset + size_len + row_id_len,
            payload_size as u64,
            column,
        )?;
        decode_record(&payload, column)
    }

    /// Collects the inline part of a payload and follows its overflow chain.
    fn assemble_payload(
        &self,
        pager: &mut Pager,
        visitor: &mut dyn BtreeVisitor,
        data: &[u8],
        offset: usize,
        payload_size: u64,
        column: &mut Column,
    ) -> Result<Vec<u8>> {
        let file_bound = u64::from(pager.page_count()) * pager.page_size() as u64;
        if payload_size > file_bound {
            return Err(RepairError::damaged(format!(
                "payload of {payload_size} bytes exceeds the file"
            )));
        }
        let size = payload_size as usize;
        let usable = pager.usable_size();
        let local = self.limits.local_payload_size(size, usable);
        if offset + local > pager.page_size() {
            return Err(RepairError::damaged(format!(
                "inline payload at {offset}+{local} overruns the page"
            )));
        }
        let inline = data
            .get(offset..offset + local)
            .ok_or_else(|| RepairError::damaged("inline payload out of range"))?;

        let mut payload = Vec::new();
        payload
            .try_reserve_exact(size)
            .map_err(|_| RepairError::NoMem { required: size })?;
        payload.extend_from_slice(inline);

        if payload.len() < size {
            let mut next = read_u32(data, offset + local)?;
            let mut visited = HashSet::new();
            let chunk_max = usable.saturating_sub(OVERFLOW_POINTER_SIZE);

            while payload.len() < size && pager.is_valid_page_number(next).is_ok() {
                if !visited.insert(next) {
                    return Err(RepairError::damaged(format!(
                        "overflow chain revisits page {next}"
                    )));
                }
                column.add_overflow_page(next);
                if visitor.begin_page(pager, self, next).is_err() {
                    break;
                }
                let overflow = match pager.acquire_overflow_page(next) {
                    Ok(page) => {
                        visitor.end_page(pager, self, next, &Ok(()));
                        page
                    }
                    Err(err) => {
                        visitor.end_page(pager, self, next, &Err(err));
                        break;
                    }
                };
                let chunk_data = overflow
                    .data()
                    .ok_or_else(|| RepairError::misuse(format!("page {next} has no data")))?;
                let take = (size - payload.len()).min(chunk_max);
                let chunk = chunk_data
                    .get(OVERFLOW_POINTER_SIZE..OVERFLOW_POINTER_SIZE + take)
                    .ok_or_else(|| RepairError::damaged("overflow chunk out of range"))?;
                payload.extend_from_slice(chunk);
                next = read_u32(chunk_data, 0)?;
            }
        }

        if payload.len() < size {
            return Err(RepairError::damaged(format!(
                "payload incomplete: {} of {size} bytes",
                payload.len()
            )));
        }
        Ok(payload)
    }
}
