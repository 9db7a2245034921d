//! Offloading of blocking driver calls.
//!
//! Every native call runs on a blocking worker so the async scheduler never
//! stalls. An [`Executor`] picks the runtime handle the work is sent to and,
//! optionally, a cap on how many calls may be in flight at once.

use std::panic;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Dispatcher for blocking driver calls.
///
/// The default executor uses the blocking pool of the runtime the caller is
/// running on.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    handle: Option<Handle>,
    limit: Option<Arc<Semaphore>>,
    max_threads: Option<usize>,
}

impl Executor {
    /// Executor bound to the ambient runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor sending work to the blocking pool of `handle`.
    #[must_use]
    pub const fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
            limit: None,
            max_threads: None,
        }
    }

    /// Executor allowing at most `max_threads` concurrent driver calls.
    ///
    /// `max_threads` is clamped to at least one.
    #[must_use]
    pub fn bounded(max_threads: usize) -> Self {
        let max_threads = max_threads.max(1);
        Self {
            handle: None,
            limit: Some(Arc::new(Semaphore::new(max_threads))),
            max_threads: Some(max_threads),
        }
    }

    /// Same limit, different runtime.
    #[must_use]
    pub fn on_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Concurrency cap, if any.
    #[must_use]
    pub const fn max_threads(&self) -> Option<usize> {
        self.max_threads
    }

    /// Run `f` on a blocking worker and await its result.
    ///
    /// A panic inside `f` is resumed on the awaiting task.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = match &self.limit {
            Some(sem) => Some(
                Arc::clone(sem)
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Dispatch(e.to_string()))?,
            ),
            None => None,
        };

        let task = move || {
            let _permit = permit;
            f()
        };
        let joined = match &self.handle {
            Some(handle) => handle.spawn_blocking(task).await,
            None => tokio::task::spawn_blocking(task).await,
        };

        match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(err) => Err(Error::Dispatch(err.to_string())),
        }
    }

    /// Run `f` in the background without waiting for it.
    ///
    /// Used from `Drop`, where nothing can be awaited. Falls back to running
    /// inline when no runtime is reachable.
    pub fn spawn_detached<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.handle.clone().or_else(|| Handle::try_current().ok());
        match handle {
            Some(handle) => {
                let permit = self
                    .limit
                    .as_ref()
                    .and_then(|sem| Arc::clone(sem).try_acquire_owned().ok());
                drop(handle.spawn_blocking(move || {
                    let _permit = permit;
                    f();
                }));
            }
            None => f(),
        }
    }
}
