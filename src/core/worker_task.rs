//! Single-shot wrapper running one compute task against one exchange.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::debug;

use crate::core::task::ComputeTask;
use crate::core::{Exchange, Outcome, TaskError};
use crate::runtime::IoExecutor;
use crate::util::{next_worker_task_id, panic_message};

/// Runs a compute task exactly once and always dispatches its exchange.
///
/// Whatever the compute task does (returns, fails, panics, overflows a
/// buffer, or unwinds on the force-terminate signal) `run` ends with exactly
/// one call to [`Exchange::dispatch`].
pub struct WorkerTask {
    id: u64,
    exchange: Exchange,
    task: Box<dyn ComputeTask>,
    completed: bool,
}

impl WorkerTask {
    /// Pair `task` with `exchange`.
    pub fn new<C>(exchange: Exchange, task: C) -> Self
    where
        C: ComputeTask,
    {
        Self {
            id: next_worker_task_id(),
            exchange,
            task: Box::new(task),
            completed: false,
        }
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The exchange this task executes.
    #[must_use]
    pub const fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// Mutable access to the exchange, e.g. to load the request body before
    /// scheduling.
    pub fn exchange_mut(&mut self) -> &mut Exchange {
        &mut self.exchange
    }

    /// True once `run` or `reject` has finished.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Consume the task, returning its exchange.
    #[must_use]
    pub fn into_exchange(self) -> Exchange {
        self.exchange
    }

    /// Run on a pool worker, giving the exchange access to the I/O runtime.
    pub(crate) fn run_with(&mut self, io: &IoExecutor) -> Outcome {
        self.exchange.attach_io(io);
        self.run()
    }

    /// Execute the compute task and dispatch.
    ///
    /// If the deadline has already passed the compute task is skipped and
    /// the exchange times out. If another outcome was set before the task
    /// started (request overflow, disconnect) it is dispatched as is.
    /// Calling `run` again after completion returns the stored outcome.
    pub fn run(&mut self) -> Outcome {
        if self.completed {
            return self.exchange.outcome();
        }
        let started = Instant::now();

        if self.exchange.is_timeout() {
            self.exchange.complete_with_timeout();
        } else if !self.exchange.is_done() {
            let exchange = &mut self.exchange;
            let task = &mut self.task;
            let result = panic::catch_unwind(AssertUnwindSafe(|| task.compute(exchange)));
            match result {
                Ok(Ok(())) => {
                    self.exchange.complete();
                }
                Ok(Err(TaskError::Terminated)) => {}
                Ok(Err(TaskError::Overflow(_))) => {
                    self.exchange.complete_with_buffer_overflow(false);
                }
                Ok(Err(err)) => {
                    self.exchange.complete_with_fail(err);
                }
                Err(payload) => {
                    let cause = anyhow::anyhow!(
                        "compute task panicked: {}",
                        panic_message(payload.as_ref())
                    );
                    self.exchange.complete_with_fail(TaskError::Failed(cause));
                }
            }
        }

        self.completed = true;
        let elapsed = started.elapsed();
        self.exchange
            .metrics()
            .record_task_duration(self.exchange.handler_name(), elapsed);
        debug!(
            task_id = self.id,
            exchange_id = self.exchange.id(),
            elapsed_ms = elapsed.as_millis(),
            "worker task finished"
        );
        self.exchange.dispatch()
    }

    /// Standard rejection path: mark `Rejected` and dispatch without running
    /// the compute task.
    pub fn reject(&mut self) -> Outcome {
        if self.completed {
            return self.exchange.outcome();
        }
        self.exchange.complete_with_rejected();
        self.completed = true;
        self.exchange.dispatch()
    }
}

impl fmt::Debug for WorkerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerTask")
            .field("id", &self.id)
            .field("exchange", &self.exchange)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}
