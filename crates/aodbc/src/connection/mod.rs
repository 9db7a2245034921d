//! Async connection over a blocking native session.
//!
//! Every native call is sent through the connection's [`Executor`]. A
//! connection is either connected (holding the native handle) or
//! disconnected; closing drops the handle and is idempotent.

mod raw;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

pub use raw::{AfterCreated, RawConnection};

use crate::common::ConnectionState;
use crate::config::ConnectOptions;
use crate::cursor::Cursor;
use crate::driver::{self, Driver, DriverResult, NativeConnection};
use crate::dsn::ConnectionString;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::types::{OutputConverter, Value};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type SharedNative = Arc<Mutex<Box<dyn NativeConnection>>>;

enum NativeState {
    Connected(SharedNative),
    Disconnected,
}

/// State shared between a [`Connection`] and the cursors it created.
pub(crate) struct ConnectionShared {
    id: u64,
    pub(crate) executor: Executor,
    echo: bool,
    autocommit: AtomicBool,
    timeout: AtomicU32,
    last_usage: Mutex<Instant>,
    state: Mutex<NativeState>,
}

impl ConnectionShared {
    fn native(&self) -> Result<SharedNative> {
        match &*self.state.lock() {
            NativeState::Connected(native) => Ok(Arc::clone(native)),
            NativeState::Disconnected => Err(ConnectionState::Closed.into_error()),
        }
    }

    pub(crate) const fn echo(&self) -> bool {
        self.echo
    }

    pub(crate) fn closed(&self) -> bool {
        matches!(&*self.state.lock(), NativeState::Disconnected)
    }

    pub(crate) fn autocommit(&self) -> Result<bool> {
        if self.closed() {
            return Err(ConnectionState::Closed.into_error());
        }
        Ok(self.autocommit.load(Ordering::Acquire))
    }

    fn touch(&self) {
        *self.last_usage.lock() = Instant::now();
    }

    /// Run `f` against the native handle on a blocking worker.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn NativeConnection) -> DriverResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let native = self.native()?;
        self.executor
            .run(move || {
                let mut guard = native.lock();
                f(&mut **guard).map_err(Error::from)
            })
            .await
    }

    /// Refresh the mirrored session flags after a call that may change them.
    async fn run_and_sync<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn NativeConnection) -> DriverResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (result, autocommit, timeout) = self
            .run(move |native| {
                let result = f(native);
                Ok((result, native.autocommit(), native.timeout()))
            })
            .await?;
        self.autocommit.store(autocommit, Ordering::Release);
        self.timeout.store(timeout, Ordering::Release);
        result.map_err(Error::from)
    }

    pub(crate) async fn close(&self) -> Result<()> {
        let native = match &*self.state.lock() {
            NativeState::Connected(native) => Arc::clone(native),
            NativeState::Disconnected => return Ok(()),
        };

        let handle = Arc::clone(&native);
        self.executor
            .run(move || handle.lock().close().map_err(Error::from))
            .await?;

        let mut state = self.state.lock();
        if matches!(&*state, NativeState::Connected(current) if Arc::ptr_eq(current, &native)) {
            *state = NativeState::Disconnected;
            tracing::debug!(connection_id = self.id, "connection closed");
        }
        Ok(())
    }

    /// Close after a driver error that killed the session.
    pub(crate) async fn close_after_failure(&self, err: &Error) {
        tracing::debug!(connection_id = self.id, error = %err, "closing connection after fatal driver error");
        if let Err(close_err) = self.close().await {
            tracing::warn!(connection_id = self.id, error = %close_err, "failed to close broken connection");
        }
    }

    /// Forget the handle without closing it.
    pub(crate) fn discard(&self) {
        *self.state.lock() = NativeState::Disconnected;
    }

    /// Drop the handle now and close it on a blocking worker, then run
    /// `on_done`. `on_done` runs right away when there is nothing to close.
    pub(crate) fn close_detached_then(&self, on_done: impl FnOnce() + Send + 'static) {
        let state = std::mem::replace(&mut *self.state.lock(), NativeState::Disconnected);
        match state {
            NativeState::Connected(native) => {
                let id = self.id;
                self.executor.spawn_detached(move || {
                    if let Err(err) = native.lock().close() {
                        tracing::warn!(connection_id = id, error = %err, "background close failed");
                    }
                    on_done();
                });
            }
            NativeState::Disconnected => on_done(),
        }
    }
}

impl Drop for ConnectionShared {
    fn drop(&mut self) {
        let state = std::mem::replace(self.state.get_mut(), NativeState::Disconnected);
        if let NativeState::Connected(native) = state {
            tracing::warn!(
                connection_id = self.id,
                "unclosed connection dropped; call close() explicitly"
            );
            let id = self.id;
            self.executor.spawn_detached(move || {
                if let Err(err) = native.lock().close() {
                    tracing::warn!(connection_id = id, error = %err, "failed to close leaked connection");
                }
            });
        }
    }
}

/// An open database connection.
///
/// Calls on one connection must not overlap: await each operation before
/// issuing the next.
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("closed", &self.closed())
            .field("echo", &self.shared.echo)
            .finish_non_exhaustive()
    }
}

impl Connection {
    fn from_native(native: Box<dyn NativeConnection>, executor: Executor, echo: bool) -> Self {
        let autocommit = native.autocommit();
        let timeout = native.timeout();
        Self {
            shared: Arc::new(ConnectionShared {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                executor,
                echo,
                autocommit: AtomicBool::new(autocommit),
                timeout: AtomicU32::new(timeout),
                last_usage: Mutex::new(Instant::now()),
                state: Mutex::new(NativeState::Connected(Arc::new(Mutex::new(native)))),
            }),
        }
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Create a cursor.
    pub async fn cursor(&self) -> Result<Cursor> {
        let native = self.shared.run(|native| native.cursor()).await?;
        self.shared.touch();
        Ok(Cursor::new(Arc::clone(&self.shared), native))
    }

    /// Execute `sql` on an implicit cursor and return it.
    ///
    /// A connection-terminating driver error closes this connection before
    /// it is returned.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<Cursor> {
        if self.shared.echo {
            tracing::info!(target: "aodbc::echo", sql, ?params, "execute");
        }
        let sql = sql.to_owned();
        let params = params.to_vec();
        let result = self
            .shared
            .run(move |native| native.execute(&sql, &params))
            .await;
        match result {
            Ok(native) => {
                self.shared.touch();
                Ok(Cursor::new(Arc::clone(&self.shared), native))
            }
            Err(err) => {
                if err.is_connection_closed() {
                    self.shared.close_after_failure(&err).await;
                }
                Err(err)
            }
        }
    }

    pub async fn commit(&self) -> Result<()> {
        self.shared.run(|native| native.commit()).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.shared.run(|native| native.rollback()).await
    }

    /// Close the connection. Closing a closed connection is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.shared.close().await
    }

    /// `SQLGetInfo` lookup.
    pub async fn getinfo(&self, info_type: u16) -> Result<Value> {
        self.shared.run(move |native| native.getinfo(info_type)).await
    }

    pub async fn add_output_converter(&self, sql_type: i16, converter: OutputConverter) -> Result<()> {
        self.shared
            .run(move |native| native.add_output_converter(sql_type, converter))
            .await
    }

    pub async fn clear_output_converters(&self) -> Result<()> {
        self.shared
            .run(|native| native.clear_output_converters())
            .await
    }

    /// `SQLSetConnectAttr` with an integer value.
    pub async fn set_attr(&self, attr_id: i32, value: i64) -> Result<()> {
        self.shared
            .run_and_sync(move |native| native.set_attr(attr_id, value))
            .await
    }

    pub async fn set_autocommit(&self, autocommit: bool) -> Result<()> {
        self.shared
            .run_and_sync(move |native| native.set_autocommit(autocommit))
            .await
    }

    pub fn autocommit(&self) -> Result<bool> {
        self.shared.autocommit()
    }

    /// Login timeout in seconds.
    pub fn timeout(&self) -> Result<u32> {
        if self.closed() {
            return Err(ConnectionState::Closed.into_error());
        }
        Ok(self.shared.timeout.load(Ordering::Acquire))
    }

    pub fn echo(&self) -> bool {
        self.shared.echo
    }

    pub fn closed(&self) -> bool {
        self.shared.closed()
    }

    /// When a cursor was last created on this connection.
    pub fn last_usage(&self) -> Instant {
        *self.shared.last_usage.lock()
    }

    /// Time since [`last_usage`](Self::last_usage).
    pub fn idle_time(&self) -> Duration {
        self.last_usage().elapsed()
    }

    /// Handle for running blocking closures against the native session.
    pub fn raw(&self) -> Result<RawConnection> {
        Ok(RawConnection::new(self.shared.native()?, self.shared.executor.clone()))
    }

    pub(crate) fn close_detached_then(&self, on_done: impl FnOnce() + Send + 'static) {
        self.shared.close_detached_then(on_done);
    }

    pub(crate) fn discard(&self) {
        self.shared.discard();
    }
}

/// A native session opened on a worker but not yet owned by a [`Connection`].
///
/// Closed in the background if the task waiting for it went away.
struct PendingSession {
    native: Option<Box<dyn NativeConnection>>,
    executor: Executor,
}

impl PendingSession {
    fn take(mut self) -> Option<Box<dyn NativeConnection>> {
        self.native.take()
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        if let Some(mut native) = self.native.take() {
            tracing::debug!("closing session of a cancelled connect");
            self.executor.spawn_detached(move || {
                if let Err(err) = native.close() {
                    tracing::warn!(error = %err, "failed to close abandoned session");
                }
            });
        }
    }
}

fn resolve_driver(options: &ConnectOptions) -> Result<Arc<dyn Driver>> {
    match &options.driver {
        Some(driver) => Ok(Arc::clone(driver)),
        None => driver::default_driver().map_err(Error::Connection),
    }
}

/// Open a connection.
///
/// Extra options are appended to `dsn` as `key=value;` attributes. When an
/// `after_created` hook is set it runs before the connection is returned.
pub async fn connect(dsn: &str, options: ConnectOptions) -> Result<Connection> {
    let driver = resolve_driver(&options)?;
    let conn_str = ConnectionString::with_extra(dsn, &options.extra)?;
    let params = options.params();
    let executor = options.executor.clone();

    let worker_executor = executor.clone();
    let pending = executor
        .run(move || {
            let native = driver
                .connect(&conn_str, &params)
                .map_err(Error::Connection)?;
            Ok(PendingSession {
                native: Some(native),
                executor: worker_executor,
            })
        })
        .await?;
    let native = pending
        .take()
        .ok_or_else(|| ConnectionState::Closed.into_error())?;
    let conn = Connection::from_native(native, executor, options.echo);

    if let Some(hook) = &options.after_created {
        if let Err(err) = hook(conn.raw()?).await {
            if let Err(close_err) = conn.close().await {
                tracing::warn!(connection_id = conn.id(), error = %close_err, "failed to close connection after hook failure");
            }
            return Err(err);
        }
    }

    tracing::debug!(connection_id = conn.id(), "connection opened");
    Ok(conn)
}

/// Named data sources known to the default driver.
pub async fn data_sources() -> Result<BTreeMap<String, String>> {
    let driver = driver::default_driver().map_err(Error::Operation)?;
    data_sources_with(driver, &Executor::new()).await
}

/// Named data sources known to `driver`.
pub async fn data_sources_with(
    driver: Arc<dyn Driver>,
    executor: &Executor,
) -> Result<BTreeMap<String, String>> {
    executor
        .run(move || driver.data_sources().map_err(Error::from))
        .await
}
