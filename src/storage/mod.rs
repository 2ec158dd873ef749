pub mod btree;
pub mod codec;
pub mod header;
pub mod pager;
pub mod record;
pub mod snapshot;
