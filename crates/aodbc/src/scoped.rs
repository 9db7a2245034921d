//! Scoped acquisition helpers.
//!
//! Each helper hands a resource to an async closure and cleans it up once
//! the closure finishes, on success and on error alike. Connection scopes
//! also finish the transaction: commit on success unless in autocommit
//! mode, roll back on error.
//!
//! ```no_run
//! use aodbc::{Pool, Value, scoped};
//! use futures::FutureExt;
//!
//! # async fn run(pool: &Pool) -> aodbc::Result<()> {
//! let total = scoped::with_connection(pool, |conn| {
//!     async move {
//!         let cursor = conn.execute("SELECT ?", &[Value::from(42)]).await?;
//!         Ok(cursor.fetchone().await?)
//!     }
//!     .boxed()
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use futures::future::BoxFuture;

use crate::config::{ConnectOptions, PoolConfig};
use crate::connection::{Connection, connect};
use crate::cursor::Cursor;
use crate::error::Result;
use crate::pool::Pool;

/// Commit or roll back according to the scope's outcome.
async fn finish<R>(conn: &Connection, result: Result<R>) -> Result<R> {
    if conn.closed() {
        return result;
    }
    match result {
        Ok(value) => {
            if !conn.autocommit()? {
                conn.commit().await?;
            }
            Ok(value)
        }
        Err(err) => {
            if matches!(conn.autocommit(), Ok(false))
                && let Err(rollback_err) = conn.rollback().await
            {
                tracing::warn!(error = %rollback_err, "rollback failed after scope error");
            }
            Err(err)
        }
    }
}

/// The scope's error wins over a cleanup error.
fn combine<R>(result: Result<R>, cleanup: Result<()>) -> Result<R> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            tracing::warn!(error = %cleanup_err, "cleanup failed after scope error");
            Err(err)
        }
    }
}

/// Open a connection, run `f` with it, then close it.
pub async fn with_connect<F, R>(dsn: &str, options: ConnectOptions, f: F) -> Result<R>
where
    F: for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, Result<R>>,
{
    let conn = connect(dsn, options).await?;
    let result = finish(&conn, f(&conn).await).await;
    combine(result, conn.close().await)
}

/// Acquire a connection from `pool`, run `f` with it, then release it.
pub async fn with_connection<F, R>(pool: &Pool, f: F) -> Result<R>
where
    F: for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, Result<R>>,
{
    let conn = pool.acquire().await?;
    let result = finish(&conn, f(&conn).await).await;
    combine(result, conn.release().await)
}

/// Create a cursor on `conn`, run `f` with it, then close it.
pub async fn with_cursor<F, R>(conn: &Connection, f: F) -> Result<R>
where
    F: for<'c> FnOnce(&'c mut Cursor) -> BoxFuture<'c, Result<R>>,
{
    let mut cursor = conn.cursor().await?;
    let result = f(&mut cursor).await;
    let result = finish(conn, result).await;
    combine(result, cursor.close().await)
}

/// Create a pool, run `f` with it, then close it and wait for the drain.
pub async fn with_pool<F, R>(config: PoolConfig, f: F) -> Result<R>
where
    F: for<'p> FnOnce(&'p Pool) -> BoxFuture<'p, Result<R>>,
{
    let pool = Pool::new(config).await?;
    let result = f(&pool).await;
    pool.close();
    combine(result, pool.wait_closed().await)
}
