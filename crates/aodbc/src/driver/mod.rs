//! Synchronous native driver interface.
//!
//! These traits describe the blocking database API the async layer wraps.
//! Implementations are called only from blocking workers (see
//! [`Executor`](crate::executor::Executor)), one call at a time per handle.

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::dsn::ConnectionString;
use crate::error::DriverError;
use crate::types::{CatalogQuery, ColumnDescription, OutputConverter, Row, Value};

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Session options passed to [`Driver::connect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub autocommit: bool,
    pub ansi: bool,
    /// Login timeout in seconds, 0 for the driver default.
    pub timeout: u32,
}

/// Entry point of a native driver.
pub trait Driver: Send + Sync + fmt::Debug {
    /// Human-readable driver name.
    fn name(&self) -> &str;

    /// Open a session described by `conn_str`.
    fn connect(
        &self,
        conn_str: &ConnectionString,
        params: &ConnectParams,
    ) -> DriverResult<Box<dyn NativeConnection>>;

    /// Named data sources and their descriptions.
    fn data_sources(&self) -> DriverResult<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

/// One open native session.
pub trait NativeConnection: Send {
    fn cursor(&mut self) -> DriverResult<Box<dyn NativeCursor>>;

    /// Create a cursor and execute `sql` on it.
    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<Box<dyn NativeCursor>> {
        let mut cursor = self.cursor()?;
        cursor.execute(sql, params)?;
        Ok(cursor)
    }

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    /// Close the session. Closing twice is not an error.
    fn close(&mut self) -> DriverResult<()>;

    fn autocommit(&self) -> bool;

    fn set_autocommit(&mut self, autocommit: bool) -> DriverResult<()>;

    /// Login/busy timeout in seconds.
    fn timeout(&self) -> u32;

    /// `SQLGetInfo` lookup for one of [`constants::info`](crate::types::constants::info).
    fn getinfo(&self, info_type: u16) -> DriverResult<Value>;

    /// Register a converter for values of `sql_type` fetched from now on.
    fn add_output_converter(&mut self, sql_type: i16, converter: OutputConverter)
    -> DriverResult<()>;

    fn clear_output_converters(&mut self) -> DriverResult<()>;

    /// `SQLSetConnectAttr` with an integer value.
    fn set_attr(&mut self, attr: i32, value: i64) -> DriverResult<()>;
}

/// One statement context on a native session.
pub trait NativeCursor: Send {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<()>;

    fn executemany(&mut self, sql: &str, seq_of_params: &[Vec<Value>]) -> DriverResult<()> {
        for params in seq_of_params {
            self.execute(sql, params)?;
        }
        Ok(())
    }

    /// Next row, or `None` once the result set is exhausted.
    fn fetchone(&mut self) -> DriverResult<Option<Row>>;

    fn fetchmany(&mut self, size: usize) -> DriverResult<Vec<Row>> {
        let mut rows = Vec::with_capacity(size.min(1024));
        while rows.len() < size {
            match self.fetchone()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    fn fetchall(&mut self) -> DriverResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetchone()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Advance to the next result set; `false` when there is none.
    fn nextset(&mut self) -> DriverResult<bool>;

    /// Run a catalog function, leaving its result set on the cursor.
    fn catalog(&mut self, query: &CatalogQuery) -> DriverResult<()> {
        Err(DriverError::not_supported(format!(
            "{} is not supported by this driver",
            query.function_name()
        ))
        .with_sqlstate("IM001"))
    }

    /// Discard the next `count` rows.
    fn skip(&mut self, count: usize) -> DriverResult<()> {
        for _ in 0..count {
            if self.fetchone()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    fn close(&mut self) -> DriverResult<()>;

    /// Columns of the current result set, `None` if the last statement
    /// produced no rows.
    fn description(&self) -> Option<Vec<ColumnDescription>>;

    /// Rows affected by the last statement, -1 when unknown.
    fn rowcount(&self) -> i64;
}

/// Driver used when [`ConnectOptions`](crate::config::ConnectOptions) names
/// none.
pub fn default_driver() -> DriverResult<Arc<dyn Driver>> {
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(sqlite::SqliteDriver::new()))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Err(DriverError::interface("no default driver available").with_sqlstate("IM002"))
    }
}
