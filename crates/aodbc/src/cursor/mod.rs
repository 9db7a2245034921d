//! Async cursor bound to one connection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::Stream;
use futures::stream;
use parking_lot::Mutex;

use crate::common::ConnectionState;
use crate::connection::ConnectionShared;
use crate::driver::{DriverResult, NativeCursor};
use crate::error::{Error, Result};
use crate::types::{
    CatalogQuery, ColumnDescription, ColumnsQuery, ForeignKeysQuery, KeysQuery, ProceduresQuery,
    Row, SpecialColumnsQuery, StatisticsQuery, TablesQuery, Value,
};

type SharedCursor = Arc<Mutex<Box<dyn NativeCursor>>>;

/// A statement context on a [`Connection`](crate::Connection).
///
/// Cursors on the same connection share its session: writes through one are
/// visible to the others. Once closed, every driver operation fails with
/// `InvalidStateError("cursor is closed")`.
pub struct Cursor {
    connection: Option<Arc<ConnectionShared>>,
    native: SharedCursor,
    echo: bool,
    arraysize: AtomicUsize,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("closed", &self.closed())
            .field("echo", &self.echo)
            .field("arraysize", &self.arraysize())
            .finish_non_exhaustive()
    }
}

impl Cursor {
    pub(crate) fn new(connection: Arc<ConnectionShared>, native: Box<dyn NativeCursor>) -> Self {
        let echo = connection.echo();
        Self {
            connection: Some(connection),
            native: Arc::new(Mutex::new(native)),
            echo,
            arraysize: AtomicUsize::new(1),
        }
    }

    fn connection(&self) -> Result<&Arc<ConnectionShared>> {
        self.connection
            .as_ref()
            .ok_or_else(|| ConnectionState::CursorClosed.into_error())
    }

    /// Run `f` on the native cursor through the connection's executor.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn NativeCursor) -> DriverResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection()?;
        let native = Arc::clone(&self.native);
        let result = conn
            .executor
            .run(move || f(&mut **native.lock()).map_err(Error::from))
            .await;
        if let Err(err) = &result
            && err.is_connection_closed()
        {
            conn.close_after_failure(err).await;
        }
        result
    }

    fn log_statement(&self, sql: &str, params: &[Value]) {
        if self.echo {
            tracing::info!(target: "aodbc::echo", sql, ?params, "execute");
        }
    }

    /// Execute `sql` with positional `params`.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<&mut Self> {
        self.log_statement(sql, params);
        let sql = sql.to_owned();
        let params = params.to_vec();
        self.run(move |native| native.execute(&sql, &params)).await?;
        Ok(self)
    }

    /// Execute `sql` once per parameter set.
    pub async fn executemany(&mut self, sql: &str, seq_of_params: Vec<Vec<Value>>) -> Result<()> {
        if self.echo {
            tracing::info!(target: "aodbc::echo", sql, batches = seq_of_params.len(), "executemany");
        }
        let sql = sql.to_owned();
        self.run(move |native| native.executemany(&sql, &seq_of_params))
            .await
    }

    /// Next row, `None` once the result set is exhausted.
    pub async fn fetchone(&self) -> Result<Option<Row>> {
        self.run(|native| native.fetchone()).await
    }

    /// Up to `size` rows; `None` or 0 fetches [`arraysize`](Self::arraysize) rows.
    pub async fn fetchmany(&self, size: Option<usize>) -> Result<Vec<Row>> {
        let size = match size {
            Some(n) if n > 0 => n,
            _ => self.arraysize(),
        };
        self.run(move |native| native.fetchmany(size)).await
    }

    pub async fn fetchall(&self) -> Result<Vec<Row>> {
        self.run(|native| native.fetchall()).await
    }

    /// Advance to the next result set; `false` when there is none.
    pub async fn nextset(&self) -> Result<bool> {
        self.run(|native| native.nextset()).await
    }

    /// Discard the next `count` rows.
    pub async fn skip(&self, count: usize) -> Result<()> {
        self.run(move |native| native.skip(count)).await
    }

    pub async fn commit(&self) -> Result<()> {
        self.run(|native| native.commit()).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.run(|native| native.rollback()).await
    }

    async fn catalog(&mut self, query: CatalogQuery) -> Result<&mut Self> {
        self.run(move |native| native.catalog(&query)).await?;
        Ok(self)
    }

    /// Tables and views matching `query` (`SQLTables`).
    pub async fn tables(&mut self, query: TablesQuery) -> Result<&mut Self> {
        self.catalog(CatalogQuery::Tables(query)).await
    }

    /// Columns matching `query` (`SQLColumns`).
    pub async fn columns(&mut self, query: ColumnsQuery) -> Result<&mut Self> {
        self.catalog(CatalogQuery::Columns(query)).await
    }

    /// Index statistics for a table (`SQLStatistics`).
    pub async fn statistics(&mut self, query: StatisticsQuery) -> Result<&mut Self> {
        self.catalog(CatalogQuery::Statistics(query)).await
    }

    /// Columns that uniquely identify a row (`SQLSpecialColumns`, best row id).
    pub async fn row_id_columns(&mut self, query: SpecialColumnsQuery) -> Result<&mut Self> {
        self.catalog(CatalogQuery::RowIdColumns(query)).await
    }

    /// Columns updated on every row change (`SQLSpecialColumns`, row version).
    pub async fn row_ver_columns(&mut self, query: SpecialColumnsQuery) -> Result<&mut Self> {
        self.catalog(CatalogQuery::RowVerColumns(query)).await
    }

    pub async fn primary_keys(&mut self, query: KeysQuery) -> Result<&mut Self> {
        self.catalog(CatalogQuery::PrimaryKeys(query)).await
    }

    pub async fn foreign_keys(&mut self, query: ForeignKeysQuery) -> Result<&mut Self> {
        self.catalog(CatalogQuery::ForeignKeys(query)).await
    }

    /// Supported data types, optionally only `data_type` (`SQLGetTypeInfo`).
    pub async fn type_info(&mut self, data_type: Option<i16>) -> Result<&mut Self> {
        self.catalog(CatalogQuery::TypeInfo(data_type)).await
    }

    pub async fn procedures(&mut self, query: ProceduresQuery) -> Result<&mut Self> {
        self.catalog(CatalogQuery::Procedures(query)).await
    }

    pub async fn procedure_columns(&mut self, query: ProceduresQuery) -> Result<&mut Self> {
        self.catalog(CatalogQuery::ProcedureColumns(query)).await
    }

    /// Close the cursor. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.connection.is_none() {
            return Ok(());
        }
        self.run(|native| native.close()).await?;
        self.connection = None;
        Ok(())
    }

    /// Remaining rows as a stream, pulled one at a time.
    pub fn rows(&self) -> impl Stream<Item = Result<Row>> + '_ {
        stream::try_unfold(self, |cursor| async move {
            Ok::<_, Error>(cursor.fetchone().await?.map(|row| (row, cursor)))
        })
    }

    /// Columns of the current result set.
    pub fn description(&self) -> Option<Vec<ColumnDescription>> {
        self.native.lock().description()
    }

    /// Rows affected by the last statement, -1 when unknown.
    pub fn rowcount(&self) -> i64 {
        self.native.lock().rowcount()
    }

    /// Default batch size of [`fetchmany`](Self::fetchmany).
    pub fn arraysize(&self) -> usize {
        self.arraysize.load(Ordering::Relaxed)
    }

    pub fn set_arraysize(&self, size: usize) {
        self.arraysize.store(size.max(1), Ordering::Relaxed);
    }

    pub const fn closed(&self) -> bool {
        self.connection.is_none()
    }

    pub const fn echo(&self) -> bool {
        self.echo
    }

    /// Autocommit mode of the owning connection.
    pub fn autocommit(&self) -> Result<bool> {
        self.connection()?.autocommit()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            let native = Arc::clone(&self.native);
            conn.executor.spawn_detached(move || {
                if let Err(err) = native.lock().close() {
                    tracing::debug!(error = %err, "background cursor close failed");
                }
            });
        }
    }
}
