use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::SharedNative;
use crate::driver::{DriverResult, NativeConnection};
use crate::error::{Error, Result};
use crate::executor::Executor;

/// Post-connect hook, run once per new connection.
pub type AfterCreated = Arc<dyn Fn(RawConnection) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Direct access to a connection's native session.
///
/// Closures passed to [`RawConnection::with`] run on the connection's
/// executor, like every other native call.
#[derive(Clone)]
pub struct RawConnection {
    native: SharedNative,
    executor: Executor,
}

impl fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConnection")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl RawConnection {
    pub(super) const fn new(native: SharedNative, executor: Executor) -> Self {
        Self { native, executor }
    }

    /// Run a blocking closure against the native session.
    pub async fn with<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn NativeConnection) -> DriverResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let native = Arc::clone(&self.native);
        self.executor
            .run(move || f(&mut **native.lock()).map_err(Error::from))
            .await
    }
}
