//! Tests for metrics sinks

use prometheus_exchange::core::{
    FacadeMetrics, InMemoryMetrics, MetricsSink, NoopMetrics, Outcome, PoolKind,
};
use std::time::Duration;

#[test]
fn test_in_memory_counts_outcomes_per_handler() {
    let metrics = InMemoryMetrics::default();
    metrics.record_outcome("search", Outcome::Done);
    metrics.record_outcome("search", Outcome::Done);
    metrics.record_outcome("search", Outcome::Timeout);
    metrics.record_outcome("upload", Outcome::Done);

    assert_eq!(metrics.outcome_count_for("search", Outcome::Done), 2);
    assert_eq!(metrics.outcome_count(Outcome::Done), 3);
    assert_eq!(metrics.outcome_count(Outcome::Rejected), 0);
    assert_eq!(metrics.total_dispatches(), 4);
}

#[test]
fn test_in_memory_tracks_pools_separately() {
    let metrics = InMemoryMetrics::default();
    metrics.record_queue_depth(PoolKind::Standard, 7);
    metrics.record_queue_depth(PoolKind::Standard, 2);
    metrics.record_rejection(PoolKind::Priority);

    assert_eq!(metrics.queue_depth(PoolKind::Standard), 2);
    assert_eq!(metrics.queue_depth(PoolKind::Priority), 0);
    assert_eq!(metrics.rejections(PoolKind::Priority), 1);
    assert_eq!(metrics.rejections(PoolKind::Standard), 0);
}

#[test]
fn test_in_memory_samples_are_bounded() {
    let metrics = InMemoryMetrics::new(2);
    for ms in [10, 20, 30] {
        metrics.record_async_task("h", "db", Duration::from_millis(ms));
    }
    let samples = metrics.async_samples("db");
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].elapsed, Duration::from_millis(20));
    assert_eq!(samples[1].elapsed, Duration::from_millis(30));
}

#[test]
fn test_sinks_without_recorder_do_not_panic() {
    let sinks: [&dyn MetricsSink; 2] = [&NoopMetrics, &FacadeMetrics];
    for sink in sinks {
        sink.record_queue_depth(PoolKind::Standard, 1);
        sink.record_rejection(PoolKind::Priority);
        sink.record_outcome("h", Outcome::Exception);
        sink.record_task_duration("h", Duration::from_millis(1));
        sink.record_async_task("h", "label", Duration::from_millis(1));
    }
}
