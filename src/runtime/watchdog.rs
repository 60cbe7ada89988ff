//! Background deadline watchdog.
//!
//! Worker threads only notice an expired deadline when they check for it.
//! The watchdog marks exchanges `Timeout` as soon as their deadline passes,
//! so a handler polling `is_done()` can stop early. It holds weak references
//! only; an exchange that finished and was dropped simply falls out. Entries
//! for finished exchanges are pruned on registration once the heap doubles,
//! so long deadlines do not let them pile up.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::core::ExchangeState;

struct Entry {
    deadline: Instant,
    seq: u64,
    state: Weak<ExchangeState>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Heap size below which registration never prunes.
const PRUNE_FLOOR: usize = 64;

struct Queue {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
    prune_at: usize,
}

impl Queue {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
            prune_at: PRUNE_FLOOR,
        }
    }

    /// Drop entries whose exchange is gone or already complete.
    fn prune(&mut self) {
        self.heap.retain(|Reverse(entry)| {
            entry.state.upgrade().is_some_and(|state| !state.is_done())
        });
        self.prune_at = (self.heap.len() * 2).max(PRUNE_FLOOR);
    }
}

struct Inner {
    queue: Mutex<Queue>,
    wakeup: Condvar,
    stopped: AtomicBool,
}

/// Thread that times out registered exchanges at their deadline.
pub struct DeadlineWatchdog {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DeadlineWatchdog {
    /// Start the watchdog thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn start() -> std::io::Result<Self> {
        let inner = Arc::new(Inner {
            queue: Mutex::new(Queue::new()),
            wakeup: Condvar::new(),
            stopped: AtomicBool::new(false),
        });
        let worker = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name("exchange-watchdog".into())
            .spawn(move || watch(&worker))?;
        info!("deadline watchdog started");
        Ok(Self {
            inner,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Track `state` until its deadline or until it completes.
    pub fn register(&self, state: &Arc<ExchangeState>) {
        if self.inner.stopped.load(Ordering::Acquire) || state.is_done() {
            return;
        }
        let mut queue = self.inner.queue.lock();
        if queue.heap.len() >= queue.prune_at {
            queue.prune();
        }
        queue.seq += 1;
        let entry = Entry {
            deadline: state.deadline(),
            seq: queue.seq,
            state: Arc::downgrade(state),
        };
        let earliest = queue
            .heap
            .peek()
            .is_none_or(|Reverse(head)| entry.deadline < head.deadline);
        queue.heap.push(Reverse(entry));
        drop(queue);
        if earliest {
            self.inner.wakeup.notify_one();
        }
    }

    /// Number of exchanges currently tracked.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().heap.len()
    }

    /// Stop the thread and wait for it. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut queue = self.inner.queue.lock();
            queue.heap.clear();
        }
        self.inner.wakeup.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        info!("deadline watchdog stopped");
    }
}

impl Drop for DeadlineWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DeadlineWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineWatchdog")
            .field("pending", &self.pending())
            .field("stopped", &self.inner.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

fn watch(inner: &Inner) {
    let mut queue = inner.queue.lock();
    loop {
        if inner.stopped.load(Ordering::Acquire) {
            return;
        }
        let Some(Reverse(head)) = queue.heap.peek() else {
            inner.wakeup.wait(&mut queue);
            continue;
        };
        let deadline = head.deadline;
        if Instant::now() < deadline {
            let _ = inner.wakeup.wait_until(&mut queue, deadline);
            continue;
        }

        let Some(Reverse(entry)) = queue.heap.pop() else {
            continue;
        };
        let Some(state) = entry.state.upgrade() else {
            continue;
        };
        if state.is_done() {
            continue;
        }
        // The timeout may have been extended since registration.
        let current = state.deadline();
        if current > Instant::now() {
            queue.seq += 1;
            let seq = queue.seq;
            queue.heap.push(Reverse(Entry {
                deadline: current,
                seq,
                state: entry.state,
            }));
        } else if state.mark_timeout() {
            debug!(exchange_id = state.id(), "watchdog timed out exchange");
        }
    }
}
