//! Async access to blocking ODBC-style database drivers.
//!
//! Every native driver call runs on a blocking worker thread, so tasks on the
//! async runtime keep making progress while the driver waits on the
//! database. On top of that adapter sits a bounded connection pool with
//! warm-up, idle recycling and graceful shutdown.
//!
//! # Features
//!
//! - [`Connection`] and [`Cursor`] mirroring the DB-API surface
//! - [`Pool`] with `minsize`/`maxsize` bounds and recycle-by-age
//! - [`scoped`] helpers that always close or release what they open
//! - Bundled SQLite driver (feature `sqlite`, on by default)
//!
//! # Example
//!
//! ```no_run
//! use aodbc::{ConnectOptions, Value};
//!
//! # async fn run() -> aodbc::Result<()> {
//! let conn = aodbc::connect("Database=app.db", ConnectOptions::new()).await?;
//! let cursor = conn.execute("SELECT ?", &[Value::from(1)]).await?;
//! assert_eq!(cursor.fetchone().await?, Some(vec![Value::Integer(1)]));
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

mod common;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod executor;
pub mod pool;
pub mod scoped;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod types;

pub use config::{ConnectOptions, PoolConfig, load_config, load_config_from_path};
pub use connection::{AfterCreated, Connection, RawConnection, connect, data_sources, data_sources_with};
pub use cursor::Cursor;
pub use driver::{ConnectParams, Driver, NativeConnection, NativeCursor};
#[cfg(feature = "sqlite")]
pub use driver::sqlite::SqliteDriver;
pub use dsn::ConnectionString;
pub use error::{DriverError, DriverErrorKind, Error, Result};
pub use executor::Executor;
pub use pool::{Pool, PoolBuilder, PoolStatus, PooledConnection, create_pool};
pub use types::{ColumnDescription, OutputConverter, Row, Value};
