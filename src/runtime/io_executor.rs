//! Tokio runtime that hosts async tasks delegated by compute tasks.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// Cloneable handle to the runtime async tasks are spawned on.
///
/// Worker threads never enter this runtime; they hand futures to it and
/// block on the result with a deadline.
#[derive(Clone, Debug)]
pub struct IoExecutor {
    handle: Arc<Handle>,
}

impl IoExecutor {
    /// Wrap an existing runtime handle.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Spawn `fut` on the runtime.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// Underlying runtime handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Build the multi-threaded runtime owned by the controller.
///
/// # Errors
///
/// Returns the I/O error reported by tokio if the runtime cannot start.
pub fn build_io_runtime(worker_threads: usize) -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .thread_name("exchange-io")
        .enable_all()
        .build()
}
