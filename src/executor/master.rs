use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    session::{Notify, Table},
    storage::btree::BtreeType,
    types::{
        PageNo,
        error::{RepairError, Result},
        row::Column,
    },
};

/// One catalog row: what the object is, how to recreate it and where its
/// tree starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterEntry {
    pub kind: BtreeType,
    pub sql: String,
    pub root_page: PageNo,
}

impl MasterEntry {
    pub fn new(kind: BtreeType, sql: impl Into<String>, root_page: PageNo) -> Self {
        Self {
            kind,
            sql: sql.into(),
            root_page,
        }
    }

    /// A placeholder whose details are filled in by a later catalog scan.
    pub fn placeholder() -> Self {
        Self::new(BtreeType::Unknown, String::new(), 0)
    }
}

/// Catalog keyed by object name, iterated in name order.
pub type MasterInfo = BTreeMap<String, MasterEntry>;

/// Builds an allow-list of table names. An empty list yields `None`, which
/// means every table is wanted.
pub fn make_master<S: AsRef<str>>(tables: &[S]) -> Option<MasterInfo> {
    if tables.is_empty() {
        return None;
    }
    Some(
        tables
            .iter()
            .map(|name| (name.as_ref().to_string(), MasterEntry::placeholder()))
            .collect(),
    )
}

/// Fills a [`MasterInfo`] from decoded `sqlite_master` rows.
///
/// With `accept_all` every table and index is taken; otherwise only rows
/// whose owning table is already a key.
#[derive(Debug)]
pub struct MasterCollector<'a> {
    master: &'a mut MasterInfo,
    accept_all: bool,
}

impl<'a> MasterCollector<'a> {
    pub fn new(master: &'a mut MasterInfo, accept_all: bool) -> Self {
        Self { master, accept_all }
    }
}

impl Notify for MasterCollector<'_> {
    fn on_column(&mut self, table: &Table, column: &Column) -> Result<()> {
        if table.kind() != BtreeType::Master {
            return Err(RepairError::misuse(format!(
                "catalog collector fed from {}",
                table.kind().name()
            )));
        }

        let (Some(kind), Some(name), Some(tbl_name)) =
            (column.text(0), column.text(1), column.text(2))
        else {
            return Err(RepairError::Discard);
        };
        let sql = column.text(4).unwrap_or_default();
        let root_page = column.integer(3) as PageNo;

        let kind = match kind {
            "table" => BtreeType::Table,
            "index" => BtreeType::Index,
            _ => return Ok(()),
        };
        if name.starts_with("sqlite_") {
            return Ok(());
        }
        if !self.accept_all && !self.master.contains_key(tbl_name) {
            return Ok(());
        }

        self.master
            .insert(name.to_string(), MasterEntry::new(kind, sql, root_page));
        Ok(())
    }
}
