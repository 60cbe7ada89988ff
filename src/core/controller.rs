//! Admission and scheduling of worker tasks onto the two bounded pools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::core::metrics::MetricsSink;
use crate::core::worker_pool::{PoolKind, PoolStats, WorkerPool};
use crate::core::{ControllerError, Outcome, WorkerTask};
use crate::runtime::{build_io_runtime, DeadlineWatchdog, IoExecutor};

/// Owns the standard and priority pools, the I/O runtime async tasks run
/// on, and the optional deadline watchdog.
///
/// Scheduling never blocks: a task that a pool cannot admit is handed to
/// the caller's rejection callback on the calling thread.
pub struct Controller {
    config: ControllerConfig,
    standard: WorkerPool,
    priority: WorkerPool,
    io: IoExecutor,
    runtime: Mutex<Option<Runtime>>,
    watchdog: Option<DeadlineWatchdog>,
    done: AtomicBool,
}

impl Controller {
    /// Start both pools, the I/O runtime and (if enabled) the watchdog.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidConfig`] when `config` fails
    /// validation, or [`ControllerError::Io`] when a thread or the runtime
    /// cannot be started.
    pub fn new(
        config: ControllerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ControllerError> {
        config.validate().map_err(ControllerError::InvalidConfig)?;

        let runtime = build_io_runtime(config.io_threads)?;
        let io = IoExecutor::new(runtime.handle().clone());

        let standard = WorkerPool::new(
            PoolKind::Standard,
            config.standard_parallelism,
            config.standard_queue_depth,
            io.clone(),
            Arc::clone(&metrics),
        )?;
        let priority = WorkerPool::new(
            PoolKind::Priority,
            config.priority_parallelism,
            config.priority_queue_depth,
            io.clone(),
            metrics,
        )?;
        let watchdog = if config.watchdog {
            Some(DeadlineWatchdog::start()?)
        } else {
            None
        };

        info!(
            standard = config.standard_parallelism,
            priority = config.priority_parallelism,
            io_threads = config.io_threads,
            watchdog = config.watchdog,
            "controller started"
        );

        Ok(Self {
            config,
            standard,
            priority,
            io,
            runtime: Mutex::new(Some(runtime)),
            watchdog,
            done: AtomicBool::new(false),
        })
    }

    /// Configuration the controller was started with.
    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Handle to the runtime async tasks are spawned on.
    #[must_use]
    pub const fn io_executor(&self) -> &IoExecutor {
        &self.io
    }

    /// True once [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    const fn pool(&self, kind: PoolKind) -> &WorkerPool {
        match kind {
            PoolKind::Standard => &self.standard,
            PoolKind::Priority => &self.priority,
        }
    }

    /// Run `task` on the priority pool if `important`, else on the standard
    /// pool. If the pool is saturated, or the controller is closed,
    /// `on_rejected` receives the task instead. Returns whether the task was
    /// admitted.
    pub fn schedule<R>(&self, task: WorkerTask, on_rejected: R, important: bool) -> bool
    where
        R: FnOnce(WorkerTask),
    {
        let kind = if important {
            PoolKind::Priority
        } else {
            PoolKind::Standard
        };

        if self.is_closed() {
            debug!(task_id = task.id(), pool = %kind, "controller closed, rejecting task");
            on_rejected(task);
            return false;
        }

        let state = Arc::clone(task.exchange().state());
        match self.pool(kind).try_submit(task) {
            Ok(()) => {
                if let Some(watchdog) = &self.watchdog {
                    watchdog.register(&state);
                }
                true
            }
            Err(task) => {
                on_rejected(task);
                false
            }
        }
    }

    /// [`Self::schedule`] with the standard rejection path: the exchange is
    /// marked `Rejected` and dispatched on the calling thread.
    pub fn schedule_or_reject(&self, task: WorkerTask, important: bool) -> bool {
        self.schedule(
            task,
            |mut task| {
                let outcome = task.reject();
                if outcome != Outcome::Rejected {
                    debug!(
                        task_id = task.id(),
                        outcome = %outcome,
                        "rejected task already complete"
                    );
                }
            },
            important,
        )
    }

    /// Utilization snapshot of one pool.
    #[must_use]
    pub fn stats(&self, kind: PoolKind) -> PoolStats {
        self.pool(kind).stats()
    }

    /// Stop admitting work and shut everything down. Idempotent.
    ///
    /// Both pools drain their queues within the shared grace period; tasks
    /// still queued after it are rejected rather than run. The I/O runtime
    /// is shut down last so in-flight async joins can finish.
    pub fn close(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let grace = self.config.shutdown_grace();
        info!(grace_ms = grace.as_millis(), "closing controller");

        let deadline = Instant::now() + grace;
        for pool in [&self.standard, &self.priority] {
            pool.shutdown(deadline);
            debug!(pool = %pool.kind(), "pool closed");
        }

        if let Some(watchdog) = &self.watchdog {
            watchdog.stop();
        }

        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_timeout(deadline.saturating_duration_since(Instant::now()));
        } else {
            warn!("I/O runtime already gone");
        }
        info!("controller closed");
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("standard", &self.standard.stats())
            .field("priority", &self.priority.stats())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
