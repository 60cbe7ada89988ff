//! Metrics sink implementations.
//!
//! The core only pushes measurements; aggregation and export belong to the
//! sink. `FacadeMetrics` forwards to the `metrics` crate so any installed
//! recorder (Prometheus exporter, statsd, ...) picks them up.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::worker_pool::PoolKind;
use crate::core::Outcome;

/// Fire-and-forget metrics sink.
pub trait MetricsSink: Send + Sync {
    /// Current number of queued, not yet started worker tasks in `pool`.
    fn record_queue_depth(&self, pool: PoolKind, depth: u64);
    /// A worker task was refused admission to `pool`.
    fn record_rejection(&self, pool: PoolKind);
    /// An exchange for `handler` was dispatched with `outcome`.
    fn record_outcome(&self, handler: &str, outcome: Outcome);
    /// Wall time of one worker task for `handler`, queueing excluded.
    fn record_task_duration(&self, handler: &str, elapsed: Duration);
    /// Wall time of one `run_async_task` call under `label`.
    fn record_async_task(&self, handler: &str, label: &str, elapsed: Duration);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_queue_depth(&self, _pool: PoolKind, _depth: u64) {}
    fn record_rejection(&self, _pool: PoolKind) {}
    fn record_outcome(&self, _handler: &str, _outcome: Outcome) {}
    fn record_task_duration(&self, _handler: &str, _elapsed: Duration) {}
    fn record_async_task(&self, _handler: &str, _label: &str, _elapsed: Duration) {}
}

/// Sink backed by the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeMetrics;

impl MetricsSink for FacadeMetrics {
    #[allow(clippy::cast_precision_loss)]
    fn record_queue_depth(&self, pool: PoolKind, depth: u64) {
        metrics::gauge!("exchange_queue_depth", "pool" => pool.as_str()).set(depth as f64);
    }

    fn record_rejection(&self, pool: PoolKind) {
        metrics::counter!("exchange_rejected_total", "pool" => pool.as_str()).increment(1);
    }

    fn record_outcome(&self, handler: &str, outcome: Outcome) {
        metrics::counter!(
            "exchange_outcome_total",
            "handler" => handler.to_owned(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    fn record_task_duration(&self, handler: &str, elapsed: Duration) {
        metrics::histogram!("exchange_task_seconds", "handler" => handler.to_owned())
            .record(elapsed.as_secs_f64());
    }

    fn record_async_task(&self, handler: &str, label: &str, elapsed: Duration) {
        metrics::histogram!(
            "exchange_async_task_seconds",
            "handler" => handler.to_owned(),
            "label" => label.to_owned()
        )
        .record(elapsed.as_secs_f64());
    }
}

/// One recorded `run_async_task` timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncTaskSample {
    /// Handler that issued the call.
    pub handler: String,
    /// Label passed to `run_async_task`.
    pub label: String,
    /// Wall time of the call.
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Recorded {
    queue_depth: HashMap<PoolKind, u64>,
    rejections: HashMap<PoolKind, u64>,
    outcomes: HashMap<(String, Outcome), u64>,
    task_durations: VecDeque<(String, Duration)>,
    async_tasks: VecDeque<AsyncTaskSample>,
}

/// In-memory sink for tests and development.
///
/// Counters are unbounded; timing samples keep the most recent
/// `max_samples` entries.
#[derive(Debug)]
pub struct InMemoryMetrics {
    inner: Mutex<Recorded>,
    max_samples: usize,
}

impl InMemoryMetrics {
    /// Create a sink keeping at most `max_samples` timings of each kind.
    #[must_use]
    pub fn new(max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(Recorded::default()),
            max_samples,
        }
    }

    /// Last reported queue depth of `pool`.
    #[must_use]
    pub fn queue_depth(&self, pool: PoolKind) -> u64 {
        self.inner.lock().queue_depth.get(&pool).copied().unwrap_or(0)
    }

    /// Rejections recorded for `pool`.
    #[must_use]
    pub fn rejections(&self, pool: PoolKind) -> u64 {
        self.inner.lock().rejections.get(&pool).copied().unwrap_or(0)
    }

    /// Dispatches with `outcome` across all handlers.
    #[must_use]
    pub fn outcome_count(&self, outcome: Outcome) -> u64 {
        self.inner
            .lock()
            .outcomes
            .iter()
            .filter(|((_, o), _)| *o == outcome)
            .map(|(_, count)| count)
            .sum()
    }

    /// Dispatches for `handler` with `outcome`.
    #[must_use]
    pub fn outcome_count_for(&self, handler: &str, outcome: Outcome) -> u64 {
        self.inner
            .lock()
            .outcomes
            .get(&(handler.to_owned(), outcome))
            .copied()
            .unwrap_or(0)
    }

    /// Total dispatches across all handlers and outcomes.
    #[must_use]
    pub fn total_dispatches(&self) -> u64 {
        self.inner.lock().outcomes.values().sum()
    }

    /// Recorded async task timings for `label`, oldest first.
    #[must_use]
    pub fn async_samples(&self, label: &str) -> Vec<AsyncTaskSample> {
        self.inner
            .lock()
            .async_tasks
            .iter()
            .filter(|sample| sample.label == label)
            .cloned()
            .collect()
    }

    /// Recorded worker task timings for `handler`, oldest first.
    #[must_use]
    pub fn task_durations(&self, handler: &str) -> Vec<Duration> {
        self.inner
            .lock()
            .task_durations
            .iter()
            .filter(|(name, _)| name == handler)
            .map(|(_, elapsed)| *elapsed)
            .collect()
    }
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    if max == 0 {
        return;
    }
    if queue.len() >= max {
        queue.pop_front();
    }
    queue.push_back(item);
}

impl MetricsSink for InMemoryMetrics {
    fn record_queue_depth(&self, pool: PoolKind, depth: u64) {
        self.inner.lock().queue_depth.insert(pool, depth);
    }

    fn record_rejection(&self, pool: PoolKind) {
        *self.inner.lock().rejections.entry(pool).or_default() += 1;
    }

    fn record_outcome(&self, handler: &str, outcome: Outcome) {
        *self
            .inner
            .lock()
            .outcomes
            .entry((handler.to_owned(), outcome))
            .or_default() += 1;
    }

    fn record_task_duration(&self, handler: &str, elapsed: Duration) {
        let mut inner = self.inner.lock();
        push_bounded(
            &mut inner.task_durations,
            (handler.to_owned(), elapsed),
            self.max_samples,
        );
    }

    fn record_async_task(&self, handler: &str, label: &str, elapsed: Duration) {
        let sample = AsyncTaskSample {
            handler: handler.to_owned(),
            label: label.to_owned(),
            elapsed,
        };
        let mut inner = self.inner.lock();
        push_bounded(&mut inner.async_tasks, sample, self.max_samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_are_bounded() {
        let sink = InMemoryMetrics::new(2);
        sink.record_async_task("h", "fetch", Duration::from_millis(1));
        sink.record_async_task("h", "fetch", Duration::from_millis(2));
        sink.record_async_task("h", "fetch", Duration::from_millis(3));

        let samples = sink.async_samples("fetch");
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].elapsed, Duration::from_millis(2));
        assert_eq!(samples[1].elapsed, Duration::from_millis(3));
    }

    #[test]
    fn outcome_counters_split_by_handler() {
        let sink = InMemoryMetrics::default();
        sink.record_outcome("a", Outcome::Done);
        sink.record_outcome("b", Outcome::Done);
        sink.record_outcome("b", Outcome::Timeout);

        assert_eq!(sink.outcome_count(Outcome::Done), 2);
        assert_eq!(sink.outcome_count_for("b", Outcome::Timeout), 1);
        assert_eq!(sink.outcome_count_for("a", Outcome::Timeout), 0);
        assert_eq!(sink.total_dispatches(), 3);
    }

    #[test]
    fn queue_depth_keeps_last_value() {
        let sink = InMemoryMetrics::default();
        sink.record_queue_depth(PoolKind::Priority, 3);
        sink.record_queue_depth(PoolKind::Priority, 1);
        assert_eq!(sink.queue_depth(PoolKind::Priority), 1);
        assert_eq!(sink.queue_depth(PoolKind::Standard), 0);
    }

    #[test]
    fn facade_without_recorder_is_a_no_op() {
        let sink = FacadeMetrics;
        sink.record_rejection(PoolKind::Standard);
        sink.record_outcome("h", Outcome::Rejected);
        sink.record_async_task("h", "fetch", Duration::from_millis(5));
    }
}
