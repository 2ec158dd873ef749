use std::{any::Any, path::Path};

use crate::{
    storage::{
        btree::{Btree, BtreeType, BtreeVisitor},
        codec::CipherConfig,
        pager::{Integrity, Pager},
    },
    types::{
        PageNo,
        error::{RepairError, ResultCode, Result},
        page::PageStatus,
        row::Column,
    },
    utils::log::Logger,
};

/// The tree a notification refers to.
pub type Table = Btree;

/// User-level callbacks for a recovery walk.
pub trait Notify {
    fn begin_table(&mut self, _table: &Table) {}

    /// Receives one decoded row. An error rejects the row: its page and
    /// overflow pages are marked discarded.
    fn on_column(&mut self, _table: &Table, _column: &Column) -> Result<()> {
        Ok(())
    }

    fn end_table(&mut self, _table: &Table) {}

    /// A cell on `pgno` could not be decoded.
    fn on_damaged_cell(&mut self, _table: &Table, _pgno: PageNo, _error: &RepairError) {}
}

/// A repair session over one source file.
pub struct Session {
    pager: Pager,
    notify: Option<Box<dyn Notify>>,
    user_info: Option<Box<dyn Any>>,
    recursive: bool,
}

impl Session {
    pub fn open<P: AsRef<Path>>(
        path: P,
        cipher: Option<&CipherConfig>,
        logger: Logger,
    ) -> Result<Self> {
        let path = path.as_ref();
        let pager = Pager::open(path, cipher, logger)?;
        let mode = if pager.has_codec() { "encrypted" } else { "plain-text" };
        pager.logger().info(
            ResultCode::Ok,
            format_args!("RepairKit on '{}' opened, {mode}.", path.display()),
        );
        Ok(Self {
            pager,
            notify: None,
            user_info: None,
            recursive: true,
        })
    }

    /// Releases the file. Dropping the session does the same.
    pub fn close(self) {}

    pub fn set_notify(&mut self, notify: Box<dyn Notify>) {
        self.notify = Some(notify);
    }

    pub fn take_notify(&mut self) -> Option<Box<dyn Notify>> {
        self.notify.take()
    }

    pub fn set_user_info(&mut self, info: Box<dyn Any>) {
        self.user_info = Some(info);
    }

    pub fn user_info(&self) -> Option<&dyn Any> {
        self.user_info.as_deref()
    }

    pub fn user_info_mut(&mut self) -> Option<&mut dyn Any> {
        self.user_info.as_deref_mut()
    }

    pub fn set_recursive(&mut self, recursive: bool) {
        self.recursive = recursive;
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn page_count(&self) -> u32 {
        self.pager.page_count()
    }

    pub fn parsed_page_count(&self) -> usize {
        self.pager.parsed_page_count()
    }

    pub fn valid_page_count(&self) -> u32 {
        self.pager.valid_page_count()
    }

    pub fn integrity(&self) -> Integrity {
        self.pager.integrity()
    }

    /// Walks every still-unchecked page as a potential B-tree root.
    pub fn parse(&mut self) -> Result<()> {
        for pgno in 1..=self.pager.page_count() {
            // Per-page failures are already recorded in the page status.
            let _ = self.parse_page(pgno);
        }
        Ok(())
    }

    pub fn parse_master(&mut self) -> Result<()> {
        self.parse_page(1)
    }

    /// Parses the tree rooted at `pgno` with the registered notify, if any.
    pub fn parse_page(&mut self, pgno: PageNo) -> Result<()> {
        let mut notify = self.notify.take();
        let borrowed = notify.as_deref_mut().map(|n| n as &mut dyn Notify);
        let result = Self::parse_root(&mut self.pager, pgno, borrowed, self.recursive);
        self.notify = notify;
        result
    }

    /// Like [`Session::parse_page`] but with a borrowed notify, so callers can
    /// lend state that does not outlive the call.
    pub fn parse_page_with(&mut self, pgno: PageNo, notify: &mut dyn Notify) -> Result<()> {
        Self::parse_root(&mut self.pager, pgno, Some(notify), self.recursive)
    }

    fn parse_root(
        pager: &mut Pager,
        pgno: PageNo,
        notify: Option<&mut dyn Notify>,
        recursive: bool,
    ) -> Result<()> {
        pager.is_valid_page_number(pgno)?;
        if pager.status(pgno) != PageStatus::Unchecked {
            return Ok(());
        }
        let btree = Btree::open(pager, pgno)?;
        let mut listener = Listener { notify, recursive };
        btree.parse(pager, &mut listener)
    }
}

/// Bridges walker callbacks to page bookkeeping, catalog rediscovery and the
/// user notify.
struct Listener<'a> {
    notify: Option<&'a mut dyn Notify>,
    recursive: bool,
}

impl Listener<'_> {
    fn discover(&mut self, pager: &mut Pager, column: &Column) {
        let (Some(kind), Some(name)) = (column.text(0), column.text(1)) else {
            return;
        };
        let root = column.integer(3);
        let kind = BtreeType::from_catalog_type(kind);

        let result = u32::try_from(root)
            .map_err(|_| RepairError::damaged(format!("root page {root}")))
            .and_then(|root| Btree::open(pager, root))
            .and_then(|mut subtree| {
                subtree.set_meta(Some(name), kind);
                subtree.parse(pager, self)
            });
        if let Err(err) = result {
            pager.logger().error(
                err.code(),
                format_args!(
                    "Failed to parse known table with root page no. {root}, name {name}, type {}: {err}",
                    kind.name()
                ),
            );
        }
    }
}

impl BtreeVisitor for Listener<'_> {
    fn begin_btree(&mut self, pager: &mut Pager, btree: &Btree) {
        if let Some(notify) = self.notify.as_deref_mut() {
            notify.begin_table(btree);
        }
        pager.logger().debug(
            ResultCode::Ok,
            format_args!(
                "Parsing B-tree -> [root: {}, name: {}, type: {}]",
                btree.root(),
                btree.name().unwrap_or("(null)"),
                btree.kind().name()
            ),
        );
    }

    fn end_btree(&mut self, _pager: &mut Pager, btree: &Btree, _result: &Result<()>) {
        if let Some(notify) = self.notify.as_deref_mut() {
            notify.end_table(btree);
        }
    }

    fn begin_page(&mut self, pager: &mut Pager, _btree: &Btree, pgno: PageNo) -> Result<()> {
        if pager.status(pgno) == PageStatus::Checking {
            return Err(RepairError::misuse(format!("page {pgno} is already being parsed")));
        }
        pager.set_status(pgno, PageStatus::Checking);
        Ok(())
    }

    fn end_page(&mut self, pager: &mut Pager, _btree: &Btree, pgno: PageNo, result: &Result<()>) {
        let status = match result {
            // A rejected row already settled this page.
            Ok(()) if pager.status(pgno) == PageStatus::Discarded => return,
            Ok(()) => PageStatus::Checked,
            Err(err) if err.is_damaged() => PageStatus::Damaged,
            Err(_) => {
                pager.logger().warn(
                    ResultCode::Misuse,
                    format_args!("Cannot parse page {pgno}. Invalid type."),
                );
                PageStatus::Invalid
            }
        };
        pager.set_status(pgno, status);
    }

    fn on_column(&mut self, pager: &mut Pager, btree: &Btree, pgno: PageNo, column: &Column) {
        if let Some(notify) = self.notify.as_deref_mut() {
            if notify.on_column(btree, column).is_err() {
                pager.set_status(pgno, PageStatus::Discarded);
                for overflow in column.overflow_pages() {
                    pager.set_status(*overflow, PageStatus::Discarded);
                }
            }
        }
        if btree.kind() == BtreeType::Master && self.recursive {
            self.discover(pager, column);
        }
    }

    fn on_cell_error(
        &mut self,
        _pager: &mut Pager,
        btree: &Btree,
        pgno: PageNo,
        _cell: usize,
        error: &RepairError,
    ) {
        if let Some(notify) = self.notify.as_deref_mut() {
            notify.on_damaged_cell(btree, pgno, error);
        }
    }
}
