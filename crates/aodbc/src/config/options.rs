//! Connection and pool options.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::connection::{AfterCreated, RawConnection};
use crate::driver::{ConnectParams, Driver};
use crate::error::{Error, Result};
use crate::executor::Executor;

/// Default number of connections kept warm by a pool.
pub const DEFAULT_MINSIZE: usize = 10;
/// Default upper bound on pool connections.
pub const DEFAULT_MAXSIZE: usize = 10;

/// Options for opening a single connection.
///
/// ```
/// use aodbc::ConnectOptions;
///
/// let options = ConnectOptions::new()
///     .autocommit(true)
///     .timeout(5)
///     .option("Mode", "rwc");
/// assert!(options.autocommit);
/// ```
#[derive(Clone, Default)]
pub struct ConnectOptions {
    pub autocommit: bool,
    pub ansi: bool,
    /// Login timeout in seconds, 0 for the driver default.
    pub timeout: u32,
    /// Log every statement at `info` level on the `aodbc::echo` target.
    pub echo: bool,
    /// Driver-specific attributes appended to the connection string.
    pub extra: BTreeMap<String, String>,
    pub executor: Executor,
    /// Native driver; the crate default when `None`.
    pub driver: Option<Arc<dyn Driver>>,
    pub after_created: Option<AfterCreated>,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("autocommit", &self.autocommit)
            .field("ansi", &self.ansi)
            .field("timeout", &self.timeout)
            .field("echo", &self.echo)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .field("executor", &self.executor)
            .field("driver", &self.driver)
            .field("after_created", &self.after_created.is_some())
            .finish()
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    #[must_use]
    pub const fn ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, secs: u32) -> Self {
        self.timeout = secs;
        self
    }

    #[must_use]
    pub const fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Add a driver-specific connection string attribute.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Hook run with the raw handle after every successful connect.
    ///
    /// A failing hook closes the new connection and fails the connect.
    #[must_use]
    pub fn after_created<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RawConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook: AfterCreated = Arc::new(move |raw: RawConnection| hook(raw).boxed());
        self.after_created = Some(hook);
        self
    }

    pub(crate) const fn params(&self) -> ConnectParams {
        ConnectParams {
            autocommit: self.autocommit,
            ansi: self.ansi,
            timeout: self.timeout,
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub dsn: String,
    pub minsize: usize,
    pub maxsize: usize,
    /// Propagated to every connection the pool opens.
    pub echo: bool,
    /// Maximum idle age of a free connection; `None` disables recycling.
    pub pool_recycle: Option<Duration>,
    pub connect: ConnectOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            minsize: DEFAULT_MINSIZE,
            maxsize: DEFAULT_MAXSIZE,
            echo: false,
            pool_recycle: None,
            connect: ConnectOptions::default(),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn minsize(mut self, minsize: usize) -> Self {
        self.minsize = minsize;
        self
    }

    #[must_use]
    pub const fn maxsize(mut self, maxsize: usize) -> Self {
        self.maxsize = maxsize;
        self
    }

    #[must_use]
    pub const fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    #[must_use]
    pub const fn pool_recycle(mut self, recycle: Option<Duration>) -> Self {
        self.pool_recycle = recycle;
        self
    }

    #[must_use]
    pub fn connect_options(mut self, options: ConnectOptions) -> Self {
        self.connect = options;
        self
    }

    /// Check sizing before any connection is opened.
    ///
    /// A `maxsize` of zero is accepted; such a pool never hands out a
    /// connection.
    pub fn validate(&self) -> Result<()> {
        if self.maxsize < self.minsize {
            return Err(Error::value("maxsize should be not less than minsize"));
        }
        Ok(())
    }
}
