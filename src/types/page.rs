use serde::{Deserialize, Serialize};

use crate::types::{HEADER_SIZE, PageNo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageType {
    InteriorIndex = 2,
    InteriorTable = 5,
    LeafIndex = 10,
    LeafTable = 13,
    Overflow = 1,
    Unknown = -1,
}

impl PageType {
    /// Classifies a B-tree flag byte. Anything but the four B-tree kinds is
    /// `Unknown`; overflow pages are never recognised from their bytes.
    pub fn from_u8(value: u8) -> Self {
        match value {
            2 => PageType::InteriorIndex,
            5 => PageType::InteriorTable,
            10 => PageType::LeafIndex,
            13 => PageType::LeafTable,
            _ => PageType::Unknown,
        }
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn name(&self) -> &'static str {
        match self {
            PageType::InteriorIndex => "interior-index",
            PageType::InteriorTable => "interior-table",
            PageType::LeafIndex => "leaf-index",
            PageType::LeafTable => "leaf-table",
            PageType::Overflow => "overflow",
            PageType::Unknown => "unknown",
        }
    }

    pub fn is_interior(&self) -> bool {
        matches!(self, PageType::InteriorIndex | PageType::InteriorTable)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PageType::LeafIndex | PageType::LeafTable)
    }

    pub fn is_index(&self) -> bool {
        matches!(self, PageType::InteriorIndex | PageType::LeafIndex)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, PageType::InteriorTable | PageType::LeafTable)
    }

    pub fn is_btree(&self) -> bool {
        self.is_index() || self.is_table()
    }

    /// Size of the B-tree page header that precedes the cell-pointer array.
    pub fn btree_header_size(&self) -> usize {
        if self.is_interior() { 12 } else { 8 }
    }
}

/// Parse status of a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageStatus {
    Invalid = -1,
    Unchecked = 0,
    Checking = 1,
    Damaged = 2,
    Discarded = 3,
    Checked = 4,
}

impl PageStatus {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn name(&self) -> &'static str {
        match self {
            PageStatus::Invalid => "invalid",
            PageStatus::Unchecked => "unchecked",
            PageStatus::Checking => "checking",
            PageStatus::Damaged => "damaged",
            PageStatus::Discarded => "discarded",
            PageStatus::Checked => "checked",
        }
    }
}

/// Offset of the B-tree page header: page 1 carries the file header first.
pub fn header_offset(pgno: PageNo) -> usize {
    if pgno == 1 { HEADER_SIZE } else { 0 }
}

/// One acquired page. The buffer is owned by whoever acquired it and may be
/// released early with [`Page::clear_data`].
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub pgno: PageNo,
    pub data: Option<Vec<u8>>,
    pub page_type: PageType,
}

impl Page {
    pub fn new(pgno: PageNo, data: Vec<u8>, page_type: PageType) -> Self {
        Self {
            pgno,
            data: Some(data),
            page_type,
        }
    }

    pub fn pgno(&self) -> PageNo {
        self.pgno
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn header_offset(&self) -> usize {
        header_offset(self.pgno)
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn clear_data(&mut self) {
        self.data = None;
    }
}
