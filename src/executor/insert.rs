use rusqlite::{Connection, Statement};

use crate::{
    session::{Notify, Table},
    types::{
        PageNo,
        error::{RepairError, ResultCode, Result},
        row::Column,
        value::Value,
    },
    utils::log::Logger,
};

/// Successful inserts between intermediate commits.
pub const COMMIT_INTERVAL: u32 = 256;

/// Trait for writing recovered rows into a destination table
pub trait Inserter {
    /// Insert a single recovered row
    fn insert(&mut self, column: &Column) -> Result<()>;

    /// Get the table name this inserter operates on
    fn table_name(&self) -> &str;
}

/// One column of the destination table as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default: Value,
    pub primary_key: bool,
}

/// Reads the column layout of `table`, evaluating each declared default.
pub fn table_columns(db: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = db.prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, i64>(3)? != 0,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)? > 0,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(raw
        .into_iter()
        .map(|(name, decl_type, not_null, default, primary_key)| ColumnInfo {
            name,
            decl_type,
            not_null,
            default: default.map_or(Value::Null, |expr| evaluate_default(db, &expr)),
            primary_key,
        })
        .collect())
}

fn evaluate_default(db: &Connection, expr: &str) -> Value {
    db.query_row(&format!("SELECT {expr}"), [], |row| {
        Ok(Value::from(row.get_ref(0)?))
    })
    .unwrap_or(Value::Null)
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

struct Prepared<'conn> {
    stmt: Statement<'conn>,
    columns: Vec<ColumnInfo>,
    /// Index of the `INTEGER PRIMARY KEY` column, if the table has one.
    rowid_alias: Option<usize>,
    /// The statement's first parameter is the row id.
    explicit_rowid: bool,
}

/// Writes the rows of one recovered table with `REPLACE INTO`, committing
/// every [`COMMIT_INTERVAL`] successful rows.
pub struct TableInserter<'conn> {
    db: &'conn Connection,
    logger: Logger,
    table_name: String,
    prepared: Option<Prepared<'conn>>,
    unusable: bool,
    succeeded: u32,
    failed: u32,
}

impl<'conn> TableInserter<'conn> {
    pub fn new(db: &'conn Connection, table_name: impl Into<String>, logger: Logger) -> Self {
        Self {
            db,
            logger,
            table_name: table_name.into(),
            prepared: None,
            unusable: false,
            succeeded: 0,
            failed: 0,
        }
    }

    pub fn succeeded(&self) -> u32 {
        self.succeeded
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    /// Whether an insert statement is open, and with it a transaction.
    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    fn prepare(&mut self) -> Result<()> {
        let columns = table_columns(self.db, &self.table_name)?;
        if columns.is_empty() {
            return Err(RepairError::misuse(format!(
                "table {} has no columns",
                self.table_name
            )));
        }

        let mut keys = columns.iter().enumerate().filter(|(_, c)| c.primary_key);
        let rowid_alias = match (keys.next(), keys.next()) {
            (Some((index, column)), None) if column.decl_type.eq_ignore_ascii_case("INTEGER") => {
                Some(index)
            }
            _ => None,
        };
        let explicit_rowid = rowid_alias.is_none()
            && !columns.iter().any(|c| c.name.eq_ignore_ascii_case("rowid"));

        let table = quote_identifier(&self.table_name);
        let placeholders = vec!["?"; columns.len() + usize::from(explicit_rowid)].join(",");
        let sql = if explicit_rowid {
            let names: Vec<String> = columns.iter().map(|c| quote_identifier(&c.name)).collect();
            format!("REPLACE INTO {table}(rowid,{}) VALUES({placeholders});", names.join(","))
        } else {
            format!("REPLACE INTO {table} VALUES({placeholders});")
        };

        let stmt = self.db.prepare(&sql)?;
        self.db.execute_batch("BEGIN;")?;
        self.prepared = Some(Prepared {
            stmt,
            columns,
            rowid_alias,
            explicit_rowid,
        });
        Ok(())
    }

    /// Commits the open transaction and releases the statement.
    pub fn finish(&mut self) -> Result<()> {
        if self.prepared.take().is_some() {
            self.db.execute_batch("COMMIT;")?;
        }
        Ok(())
    }
}

impl Inserter for TableInserter<'_> {
    fn insert(&mut self, column: &Column) -> Result<()> {
        if self.prepared.is_none() && !self.unusable {
            if let Err(err) = self.prepare() {
                self.logger.warn(
                    err.code(),
                    format_args!("Cannot prepare insert for table '{}': {err}", self.table_name),
                );
                self.unusable = true;
            }
        }
        let Some(prepared) = self.prepared.as_mut() else {
            self.failed += 1;
            return Err(RepairError::Discard);
        };

        let offset = usize::from(prepared.explicit_rowid);
        if prepared.explicit_rowid {
            prepared.stmt.raw_bind_parameter(1, column.row_id())?;
        }
        let decoded = column.count().min(prepared.columns.len());
        for (index, info) in prepared.columns.iter().enumerate() {
            let value = if index < decoded {
                column.get_value(index).unwrap_or(&Value::Null)
            } else {
                &info.default
            };
            let param = index + offset + 1;
            if prepared.rowid_alias == Some(index) && value.is_null() {
                prepared.stmt.raw_bind_parameter(param, column.row_id())?;
            } else {
                prepared.stmt.raw_bind_parameter(param, value)?;
            }
        }

        match prepared.stmt.raw_execute() {
            Ok(_) => self.succeeded += 1,
            Err(err) => {
                self.failed += 1;
                self.logger.warn(
                    ResultCode::IoErr,
                    format_args!(
                        "Failed to insert row {} into '{}': {err}",
                        column.row_id(),
                        self.table_name
                    ),
                );
                return Ok(());
            }
        }

        if self.succeeded % COMMIT_INTERVAL == 0 {
            self.db.execute_batch("COMMIT; BEGIN;")?;
        }
        Ok(())
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl Notify for TableInserter<'_> {
    fn on_column(&mut self, _table: &Table, column: &Column) -> Result<()> {
        self.insert(column)
    }

    fn on_damaged_cell(&mut self, table: &Table, pgno: PageNo, error: &RepairError) {
        self.failed += 1;
        self.logger.debug(
            error.code(),
            format_args!(
                "Lost a row of '{}' on page {pgno}: {error}",
                table.name().unwrap_or(&self.table_name)
            ),
        );
    }
}
