//! Bounded worker pool with dedicated OS threads.
//!
//! Each pool runs a fixed number of worker threads fed by a crossbeam
//! channel. Admission is decided up front by a lock-free permit counter:
//! a task is accepted only while fewer than `parallelism + queue_depth`
//! tasks are in flight, so `submit` never blocks and a saturated pool
//! hands the task straight back to the caller.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on channel recv
//! - **Lock-free admission**: CAS loop on the in-flight counter
//! - **Draining shutdown**: dropping the sender lets workers finish what is
//!   queued; after the grace period queued work is rejected instead of run

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::core::metrics::MetricsSink;
use crate::core::WorkerTask;
use crate::runtime::IoExecutor;
use crate::util::panic_message;

/// Which of the controller's two pools a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Pool for ordinary requests.
    Standard,
    /// Pool reserved for latency-sensitive ("important") requests.
    Priority,
}

impl PoolKind {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub parallelism: usize,
    /// Tasks that may wait beyond the running ones.
    pub queue_depth: usize,
    /// Admitted tasks not yet finished (queued + active).
    pub in_flight: usize,
    /// Tasks waiting for a worker.
    pub queued_tasks: u64,
    /// Tasks currently executing.
    pub active_tasks: u64,
    /// Tasks finished.
    pub completed_tasks: u64,
    /// Tasks refused admission.
    pub rejected_tasks: u64,
    /// Tasks admitted.
    pub submitted_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
struct PoolCounters {
    queued_tasks: AtomicU64,
    active_tasks: AtomicU64,
    completed_tasks: AtomicU64,
    rejected_tasks: AtomicU64,
    submitted_tasks: AtomicU64,
}

/// State shared between the pool handle and its worker threads.
struct Shared {
    kind: PoolKind,
    counters: PoolCounters,
    in_flight: AtomicUsize,
    /// Set once the grace period has run out; queued tasks are rejected.
    force: AtomicBool,
    metrics: Arc<dyn MetricsSink>,
    io: IoExecutor,
}

impl Shared {
    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn report_queue_depth(&self) {
        let depth = self.counters.queued_tasks.load(Ordering::Relaxed);
        self.metrics.record_queue_depth(self.kind, depth);
    }
}

/// Fixed-size pool of worker threads with non-blocking admission.
pub(crate) struct WorkerPool {
    parallelism: usize,
    queue_depth: usize,
    task_tx: Mutex<Option<Sender<WorkerTask>>>,
    shared: Arc<Shared>,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `parallelism` worker threads.
    pub(crate) fn new(
        kind: PoolKind,
        parallelism: usize,
        queue_depth: usize,
        io: IoExecutor,
        metrics: Arc<dyn MetricsSink>,
    ) -> std::io::Result<Self> {
        let (task_tx, task_rx) = unbounded::<WorkerTask>();
        let shared = Arc::new(Shared {
            kind,
            counters: PoolCounters::default(),
            in_flight: AtomicUsize::new(0),
            force: AtomicBool::new(false),
            metrics,
            io,
        });

        let mut workers = Vec::with_capacity(parallelism);
        for worker_id in 0..parallelism {
            workers.push(spawn_worker(worker_id, task_rx.clone(), Arc::clone(&shared))?);
        }

        info!(
            pool = %kind,
            parallelism,
            queue_depth,
            "worker pool started"
        );

        Ok(Self {
            parallelism,
            queue_depth,
            task_tx: Mutex::new(Some(task_tx)),
            shared,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    pub(crate) fn kind(&self) -> PoolKind {
        self.shared.kind
    }

    /// Try to reserve an in-flight slot using a CAS loop.
    fn try_reserve(&self) -> bool {
        let limit = self.parallelism + self.queue_depth;
        let in_flight = &self.shared.in_flight;
        let mut current = in_flight.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return false;
            }
            match in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Admit `task` or hand it back untouched.
    pub(crate) fn try_submit(&self, task: WorkerTask) -> Result<(), WorkerTask> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(task);
        }
        if !self.try_reserve() {
            self.shared
                .counters
                .rejected_tasks
                .fetch_add(1, Ordering::Relaxed);
            self.shared.metrics.record_rejection(self.shared.kind);
            warn!(
                pool = %self.shared.kind,
                task_id = task.id(),
                "worker pool saturated, rejecting task"
            );
            return Err(task);
        }

        let task_tx = self.task_tx.lock();
        let Some(sender) = task_tx.as_ref() else {
            self.shared.release();
            return Err(task);
        };

        let task_id = task.id();
        // Count before sending so a fast worker never decrements first.
        self.shared
            .counters
            .queued_tasks
            .fetch_add(1, Ordering::Relaxed);
        if let Err(err) = sender.send(task) {
            self.shared
                .counters
                .queued_tasks
                .fetch_sub(1, Ordering::Relaxed);
            self.shared.release();
            return Err(err.into_inner());
        }
        self.shared
            .counters
            .submitted_tasks
            .fetch_add(1, Ordering::Relaxed);
        self.shared.report_queue_depth();
        debug!(pool = %self.shared.kind, task_id, "task admitted");
        Ok(())
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            parallelism: self.parallelism,
            queue_depth: self.queue_depth,
            in_flight: self.shared.in_flight.load(Ordering::Relaxed),
            queued_tasks: c.queued_tasks.load(Ordering::Relaxed),
            active_tasks: c.active_tasks.load(Ordering::Relaxed),
            completed_tasks: c.completed_tasks.load(Ordering::Relaxed),
            rejected_tasks: c.rejected_tasks.load(Ordering::Relaxed),
            submitted_tasks: c.submitted_tasks.load(Ordering::Relaxed),
        }
    }

    /// Stop admitting work, let workers drain the queue, and wait until
    /// `deadline` for them to exit. Workers still busy after that are
    /// detached; anything they dequeue afterwards is rejected.
    pub(crate) fn shutdown(&self, deadline: Instant) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(pool = %self.shared.kind, "shutting down worker pool");

        // Dropping the sender unblocks idle workers once the queue is empty.
        self.task_tx.lock().take();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let worker_count = workers.len();
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        for (idx, worker) in workers.into_iter().enumerate() {
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let joined = worker.join().is_ok();
                let _ = done_tx.send((idx, joined));
            });
        }
        drop(done_tx);

        let mut exited = 0;
        while exited < worker_count {
            let wait = deadline.saturating_duration_since(Instant::now());
            match done_rx.recv_timeout(wait) {
                Ok((idx, true)) => {
                    debug!(pool = %self.shared.kind, worker_id = idx, "worker joined");
                    exited += 1;
                }
                Ok((idx, false)) => {
                    warn!(pool = %self.shared.kind, worker_id = idx, "worker panicked");
                    exited += 1;
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    self.shared.force.store(true, Ordering::Release);
                    warn!(
                        pool = %self.shared.kind,
                        remaining = worker_count - exited,
                        "workers did not exit within grace period - detaching"
                    );
                    break;
                }
            }
        }

        info!(pool = %self.shared.kind, worker_count, "worker pool shut down complete");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but do not join; explicit shutdown() waits.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.task_tx.lock().take();
            debug!(pool = %self.shared.kind, "worker pool dropped without explicit shutdown");
        }
    }
}

fn spawn_worker(
    worker_id: usize,
    task_rx: Receiver<WorkerTask>,
    shared: Arc<Shared>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("exchange-{}-{worker_id}", shared.kind))
        .spawn(move || {
            debug!(pool = %shared.kind, worker_id, "worker thread started");

            // Returns Err only once the sender is dropped and the queue drained.
            while let Ok(mut task) = task_rx.recv() {
                let counters = &shared.counters;
                counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                shared.report_queue_depth();
                counters.active_tasks.fetch_add(1, Ordering::Relaxed);

                let task_id = task.id();
                let force = shared.force.load(Ordering::Acquire);
                let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    if force {
                        task.reject()
                    } else {
                        task.run_with(&shared.io)
                    }
                }));
                match run {
                    Ok(outcome) => {
                        debug!(
                            pool = %shared.kind,
                            worker_id,
                            task_id,
                            outcome = %outcome,
                            "task finished"
                        );
                    }
                    Err(payload) => {
                        error!(
                            pool = %shared.kind,
                            worker_id,
                            task_id,
                            panic = %panic_message(payload.as_ref()),
                            "listener or completion hook panicked"
                        );
                    }
                }

                counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
                counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
                shared.release();
            }

            debug!(pool = %shared.kind, worker_id, "worker thread exiting");
        })
}
