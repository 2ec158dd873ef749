pub mod executor;
pub mod session;
pub mod storage;
pub mod types;
pub mod utils;

pub use executor::{
    master::{MasterEntry, MasterInfo, make_master},
    output::{OutputFlags, OutputStats, output},
};
pub use session::{Notify, Session, Table};
pub use storage::{
    codec::CipherConfig,
    snapshot::{load_master, save_master},
};
pub use types::error::{RepairError, Result, ResultCode};
