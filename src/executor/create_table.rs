use rusqlite::Connection;

use crate::{
    executor::master::MasterEntry,
    types::error::{ResultCode, Result},
    utils::log::Logger,
};

/// Trait for recreating schema objects in the destination database
pub trait TableCreator {
    /// Execute the stored `CREATE` statement of a catalog entry
    fn create(&mut self, name: &str, entry: &MasterEntry) -> Result<()>;

    /// Number of statements that succeeded and failed so far
    fn counts(&self) -> (u32, u32);
}

/// Executes catalog `CREATE TABLE` / `CREATE INDEX` statements one by one
pub struct CreateTableExecutor<'conn> {
    db: &'conn Connection,
    logger: Logger,
    succeeded: u32,
    failed: u32,
}

impl<'conn> CreateTableExecutor<'conn> {
    pub fn new(db: &'conn Connection, logger: Logger) -> Self {
        Self {
            db,
            logger,
            succeeded: 0,
            failed: 0,
        }
    }
}

impl TableCreator for CreateTableExecutor<'_> {
    fn create(&mut self, name: &str, entry: &MasterEntry) -> Result<()> {
        if entry.sql.is_empty() {
            return Ok(());
        }
        self.logger
            .debug(ResultCode::Ok, format_args!(">>> {}", entry.sql));
        match self.db.execute_batch(&entry.sql) {
            Ok(()) => {
                self.succeeded += 1;
                Ok(())
            }
            Err(err) => {
                self.logger.warn(
                    ResultCode::IoErr,
                    format_args!("EXEC FAILED: {err} [SQL: {}] ({name})", entry.sql),
                );
                self.failed += 1;
                Err(err.into())
            }
        }
    }

    fn counts(&self) -> (u32, u32) {
        (self.succeeded, self.failed)
    }
}
