//! Process-wide monotonic identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

static EXCHANGE_IDS: AtomicU64 = AtomicU64::new(1);
static WORKER_TASK_IDS: AtomicU64 = AtomicU64::new(1);

/// Next exchange identifier. Strictly increasing within the process.
pub fn next_exchange_id() -> u64 {
    EXCHANGE_IDS.fetch_add(1, Ordering::Relaxed)
}

/// Next worker task identifier. Strictly increasing within the process.
pub fn next_worker_task_id() -> u64 {
    WORKER_TASK_IDS.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase() {
        let a = next_exchange_id();
        let b = next_exchange_id();
        assert!(b > a);

        let x = next_worker_task_id();
        let y = next_worker_task_id();
        assert!(y > x);
    }
}
