use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::PoolInner;
use crate::connection::Connection;
use crate::error::Result;

/// A connection checked out of a [`Pool`](super::Pool).
///
/// Dereferences to [`Connection`]. Call [`release`](Self::release) to hand
/// it back; dropping the guard releases it as well, without waiting for a
/// close when the pool is shutting down.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    pub(super) const fn new(conn: Connection, pool: Arc<PoolInner>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    pub(super) const fn pool(&self) -> &Arc<PoolInner> {
        &self.pool
    }

    /// Return the connection to its pool.
    pub async fn release(mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => self.pool.release(conn).await,
            None => Ok(()),
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("pooled connection is present until released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("pooled connection is present until released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release_detached(conn);
        }
    }
}
