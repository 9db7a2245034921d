//! Connection pool.
//!
//! A pool keeps between `minsize` and `maxsize` connections to one data
//! source. Each connection is in exactly one place at a time:
//!
//! - `free`: idle, queued for reuse (FIFO)
//! - `used`: checked out through a [`PooledConnection`]
//! - `acquiring`: still being opened
//!
//! `size() == freesize() + used + acquiring` holds whenever the state lock is
//! released. The lock is never held across an `.await`; every mutation is
//! followed by a wakeup of tasks waiting in [`Pool::acquire`] or
//! [`Pool::wait_closed`].
//!
//! # Example
//!
//! ```no_run
//! use aodbc::{Pool, Value};
//!
//! # async fn run() -> aodbc::Result<()> {
//! let pool = Pool::builder("Database=app.db").minsize(1).maxsize(4).build().await?;
//!
//! let conn = pool.acquire().await?;
//! let cursor = conn.execute("SELECT ?", &[Value::from(1)]).await?;
//! assert_eq!(cursor.fetchone().await?, Some(vec![Value::Integer(1)]));
//! conn.release().await?;
//!
//! pool.close();
//! pool.wait_closed().await?;
//! # Ok(())
//! # }
//! ```

mod guard;

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

pub use guard::PooledConnection;

use crate::config::{ConnectOptions, PoolConfig};
use crate::connection::{Connection, connect};
use crate::error::{Error, Result};

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections owned by the pool, including ones being opened.
    pub size: usize,
    /// Idle connections ready to be acquired.
    pub available: usize,
    /// Connections checked out.
    pub in_use: usize,
    /// Connections being opened.
    pub acquiring: usize,
    pub max_size: usize,
}

#[derive(Default)]
struct PoolState {
    free: VecDeque<Connection>,
    used: HashSet<u64>,
    acquiring: usize,
    closing: bool,
    closed: bool,
}

impl PoolState {
    fn size(&self) -> usize {
        self.free.len() + self.used.len() + self.acquiring
    }
}

/// Outcome of handing a connection back.
enum Checkin {
    Done,
    /// The pool is closing; the connection is still counted as used until
    /// it has been closed.
    Close(Connection),
}

pub(crate) struct PoolInner {
    dsn: String,
    options: ConnectOptions,
    minsize: usize,
    maxsize: usize,
    recycle: Option<Duration>,
    echo: bool,
    state: Mutex<PoolState>,
    notify: Notify,
}

impl PoolInner {
    fn wake(&self) {
        self.notify.notify_waiters();
    }

    /// Count one in-flight creation if `admit` allows it.
    fn reserve(&self, admit: impl FnOnce(&PoolState) -> bool) -> Option<Reservation<'_>> {
        let mut state = self.state.lock();
        if !admit(&state) {
            return None;
        }
        state.acquiring += 1;
        Some(Reservation {
            pool: self,
            fulfilled: false,
        })
    }

    async fn create(&self) -> Result<Connection> {
        let conn = connect(&self.dsn, self.options.clone()).await?;
        tracing::debug!(connection_id = conn.id(), "pooled connection created");
        Ok(conn)
    }

    /// Close free connections idle for longer than the recycle threshold.
    ///
    /// Close failures are logged and the connection is evicted anyway.
    async fn recycle_idle(&self) {
        let Some(recycle) = self.recycle else {
            return;
        };
        let expired: Vec<Connection> = {
            let mut state = self.state.lock();
            let (expired, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.free)
                .into_iter()
                .partition(|conn| conn.idle_time() > recycle);
            state.free = keep.into();
            expired
        };
        if expired.is_empty() {
            return;
        }
        self.wake();

        let mut expired = Expired(expired.into());
        while let Some(conn) = expired.0.front() {
            tracing::debug!(connection_id = conn.id(), "recycling idle connection");
            if let Err(err) = conn.close().await {
                tracing::warn!(connection_id = conn.id(), error = %err, "failed to close recycled connection");
                conn.discard();
            }
            expired.0.pop_front();
        }
    }

    /// Top the pool up to `minsize`, plus one connection when `override_min`
    /// is set and nothing is free.
    async fn fill_free_pool(&self, override_min: bool) -> Result<()> {
        self.recycle_idle().await;

        while let Some(reservation) = self.reserve(|state| state.size() < self.minsize) {
            reservation.fulfil(self.create().await?);
        }

        if override_min
            && let Some(reservation) =
                self.reserve(|state| state.free.is_empty() && state.size() < self.maxsize)
        {
            reservation.fulfil(self.create().await?);
        }
        Ok(())
    }

    fn checkin(&self, conn: Connection) -> Result<Checkin> {
        let mut state = self.state.lock();
        let id = conn.id();
        if !state.used.contains(&id) {
            return Err(Error::illegal_state(format!(
                "connection {id} is not checked out from this pool"
            )));
        }
        if conn.closed() {
            state.used.remove(&id);
            tracing::debug!(connection_id = id, "closed connection evicted on release");
            return Ok(Checkin::Done);
        }
        if state.closing {
            return Ok(Checkin::Close(conn));
        }
        state.used.remove(&id);
        state.free.push_back(conn);
        Ok(Checkin::Done)
    }

    fn forget(&self, id: u64) {
        self.state.lock().used.remove(&id);
        self.wake();
    }

    pub(super) async fn release(&self, conn: Connection) -> Result<()> {
        match self.checkin(conn)? {
            Checkin::Done => {
                self.wake();
                Ok(())
            }
            Checkin::Close(conn) => {
                let _slot = UsedSlot {
                    pool: self,
                    id: conn.id(),
                };
                let closed = conn.close().await;
                if closed.is_err() {
                    conn.discard();
                }
                closed
            }
        }
    }

    /// Synchronous release used when a guard is dropped.
    ///
    /// Under a closing pool the connection stays counted as used until its
    /// background close has finished.
    pub(super) fn release_detached(self: &Arc<Self>, conn: Connection) {
        match self.checkin(conn) {
            Ok(Checkin::Done) => self.wake(),
            Ok(Checkin::Close(conn)) => {
                let pool = Arc::clone(self);
                let id = conn.id();
                conn.close_detached_then(move || pool.forget(id));
            }
            Err(err) => tracing::warn!(error = %err, "failed to return dropped connection"),
        }
    }

    /// Close `conns`, returning the first failure.
    async fn close_all(conns: VecDeque<Connection>) -> Option<Error> {
        let mut first_error = None;
        for conn in conns {
            if let Err(err) = conn.close().await {
                tracing::warn!(connection_id = conn.id(), error = %err, "failed to close pooled connection");
                conn.discard();
                first_error.get_or_insert(err);
            }
        }
        first_error
    }
}

/// One unit of `acquiring`, returned when dropped.
struct Reservation<'a> {
    pool: &'a PoolInner,
    fulfilled: bool,
}

impl Reservation<'_> {
    /// Trade the reservation for a free connection.
    fn fulfil(mut self, conn: Connection) {
        {
            let mut state = self.pool.state.lock();
            state.acquiring -= 1;
            state.free.push_back(conn);
        }
        self.fulfilled = true;
        self.pool.wake();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.fulfilled {
            self.pool.state.lock().acquiring -= 1;
            self.pool.wake();
        }
    }
}

/// Connections evicted by a recycle sweep and not closed yet.
///
/// If the sweep is cancelled, the rest are closed in the background.
struct Expired(VecDeque<Connection>);

impl Drop for Expired {
    fn drop(&mut self) {
        for conn in self.0.drain(..) {
            conn.close_detached_then(|| {});
        }
    }
}

/// Keeps a connection counted as used while a closing pool closes it.
struct UsedSlot<'a> {
    pool: &'a PoolInner,
    id: u64,
}

impl Drop for UsedSlot<'_> {
    fn drop(&mut self) {
        self.pool.forget(self.id);
    }
}

/// Bounded pool of connections to one data source.
///
/// Cloning is cheap; clones share the same connections.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("minsize", &self.inner.minsize)
            .field("maxsize", &self.inner.maxsize)
            .field("status", &self.status())
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Create a pool and open `minsize` connections.
    ///
    /// # Errors
    ///
    /// `Error::Value` for invalid sizes (nothing is opened), or the first
    /// connection failure during warm-up. Connections opened before the
    /// failure are closed.
    pub async fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let mut options = config.connect;
        options.echo |= config.echo;
        let pool = Self {
            inner: Arc::new(PoolInner {
                dsn: config.dsn,
                options,
                minsize: config.minsize,
                maxsize: config.maxsize,
                recycle: config.pool_recycle,
                echo: config.echo,
                state: Mutex::new(PoolState::default()),
                notify: Notify::new(),
            }),
        };

        tracing::info!(
            minsize = pool.inner.minsize,
            maxsize = pool.inner.maxsize,
            recycle = ?pool.inner.recycle,
            "connection pool created"
        );

        if let Err(err) = pool.inner.fill_free_pool(false).await {
            pool.close();
            if let Err(close_err) = pool.wait_closed().await {
                tracing::warn!(error = %close_err, "failed to close pool after warm-up failure");
            }
            return Err(err);
        }
        Ok(pool)
    }

    #[must_use]
    pub fn builder(dsn: impl Into<String>) -> PoolBuilder {
        PoolBuilder {
            config: PoolConfig::new(dsn),
        }
    }

    /// Check out a connection, waiting while the pool is at `maxsize`.
    ///
    /// Idle connections past the recycle threshold are replaced first.
    ///
    /// # Errors
    ///
    /// `Error::PoolClosing` once [`close`](Self::close) was called, or the
    /// failure of opening a new connection.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        loop {
            let mut notified = pin!(inner.notify.notified());
            notified.as_mut().enable();

            if inner.state.lock().closing {
                return Err(Error::PoolClosing);
            }
            inner.fill_free_pool(true).await?;

            {
                let mut state = inner.state.lock();
                if state.closing {
                    return Err(Error::PoolClosing);
                }
                if let Some(conn) = state.free.pop_front() {
                    state.used.insert(conn.id());
                    return Ok(PooledConnection::new(conn, Arc::clone(inner)));
                }
            }

            notified.await;
        }
    }

    /// Return a connection to the pool.
    ///
    /// Closed connections are evicted. While the pool is closing the
    /// connection is closed instead of pooled.
    ///
    /// # Errors
    ///
    /// `Error::IllegalState` if `conn` belongs to another pool (it is then
    /// returned to its own pool), or the close failure of a closing pool.
    pub async fn release(&self, conn: PooledConnection) -> Result<()> {
        if !Arc::ptr_eq(conn.pool(), &self.inner) {
            return Err(Error::illegal_state(
                "connection was not acquired from this pool",
            ));
        }
        conn.release().await
    }

    /// Close every free connection. Checked-out connections are untouched.
    pub async fn clear(&self) -> Result<()> {
        let free = std::mem::take(&mut self.inner.state.lock().free);
        tracing::debug!(count = free.len(), "clearing free connections");
        let first_error = PoolInner::close_all(free).await;
        self.inner.wake();
        first_error.map_or(Ok(()), Err)
    }

    /// Stop handing out connections. Follow with [`wait_closed`](Self::wait_closed).
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closing || state.closed {
                return;
            }
            state.closing = true;
        }
        tracing::info!("closing connection pool");
        self.inner.wake();
    }

    /// Close free connections and wait until every checked-out one is back.
    ///
    /// # Errors
    ///
    /// `Error::IllegalState` if [`close`](Self::close) was not called first,
    /// otherwise the first connection close failure.
    pub async fn wait_closed(&self) -> Result<()> {
        let inner = &self.inner;
        let mut first_error = None;
        loop {
            let mut notified = pin!(inner.notify.notified());
            notified.as_mut().enable();

            let free = {
                let mut state = inner.state.lock();
                if state.closed {
                    break;
                }
                if !state.closing {
                    return Err(Error::illegal_state(
                        ".wait_closed() should be called after .close()",
                    ));
                }
                std::mem::take(&mut state.free)
            };
            if let Some(err) = PoolInner::close_all(free).await {
                first_error.get_or_insert(err);
            }

            {
                let mut state = inner.state.lock();
                if !state.free.is_empty() {
                    continue;
                }
                if state.used.is_empty() && state.acquiring == 0 {
                    state.closed = true;
                    drop(state);
                    tracing::info!("connection pool closed");
                    inner.wake();
                    break;
                }
            }

            notified.await;
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Connections owned by the pool: free, checked out and being opened.
    pub fn size(&self) -> usize {
        self.inner.state.lock().size()
    }

    pub fn freesize(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    pub fn minsize(&self) -> usize {
        self.inner.minsize
    }

    pub fn maxsize(&self) -> usize {
        self.inner.maxsize
    }

    /// Whether [`wait_closed`](Self::wait_closed) has finished.
    pub fn closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn echo(&self) -> bool {
        self.inner.echo
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            size: state.size(),
            available: state.free.len(),
            in_use: state.used.len(),
            acquiring: state.acquiring,
            max_size: self.inner.maxsize,
        }
    }
}

/// Builder for [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    #[must_use]
    pub const fn minsize(mut self, minsize: usize) -> Self {
        self.config.minsize = minsize;
        self
    }

    #[must_use]
    pub const fn maxsize(mut self, maxsize: usize) -> Self {
        self.config.maxsize = maxsize;
        self
    }

    #[must_use]
    pub const fn echo(mut self, echo: bool) -> Self {
        self.config.echo = echo;
        self
    }

    /// Maximum idle age of a free connection before it is replaced.
    #[must_use]
    pub const fn pool_recycle(mut self, recycle: Duration) -> Self {
        self.config.pool_recycle = Some(recycle);
        self
    }

    #[must_use]
    pub fn connect_options(mut self, options: ConnectOptions) -> Self {
        self.config.connect = options;
        self
    }

    pub async fn build(self) -> Result<Pool> {
        Pool::new(self.config).await
    }
}

/// Create a pool from a loaded configuration.
pub async fn create_pool(config: PoolConfig) -> Result<Pool> {
    Pool::new(config).await
}
