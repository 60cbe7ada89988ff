//! Tests for error types

use prometheus_exchange::core::{
    BoundedBuffer, CapacityExceeded, ControllerError, ExchangeError, TaskError,
};
use std::io::{self, Write};

#[test]
fn test_capacity_exceeded_display() {
    let err = CapacityExceeded {
        requested: 4,
        available: 3,
    };
    assert_eq!(
        format!("{err}"),
        "buffer capacity exceeded: requested 4 bytes, 3 available"
    );
}

#[test]
fn test_task_error_display() {
    assert_eq!(format!("{}", TaskError::Terminated), "exchange terminated");
    assert_eq!(format!("{}", TaskError::Timeout), "deadline exceeded");
    assert_eq!(format!("{}", TaskError::Interrupted), "execution interrupted");
    let failed = TaskError::from(anyhow::anyhow!("upstream refused"));
    assert_eq!(format!("{failed}"), "upstream refused");
}

#[test]
fn test_buffer_writer_overflow_converts_with_question_mark() {
    fn fill(buffer: &mut BoundedBuffer) -> Result<(), TaskError> {
        let mut writer = buffer.writer();
        writer.write_all(b"hello")?;
        writer.write_all(b"four")?;
        Ok(())
    }

    let mut buffer = BoundedBuffer::new(8);
    match fill(&mut buffer) {
        Err(TaskError::Overflow(overflow)) => {
            assert_eq!(overflow.requested, 4);
            assert_eq!(overflow.available, 3);
        }
        other => panic!("expected overflow, got {other:?}"),
    }
    assert_eq!(buffer.len(), 5);
}

#[test]
fn test_io_timeout_becomes_task_timeout() {
    let err: TaskError = io::Error::new(io::ErrorKind::TimedOut, "read timed out").into();
    assert!(matches!(err, TaskError::Timeout));
    assert!(!err.is_terminated());
    assert!(TaskError::Terminated.is_terminated());
}

#[test]
fn test_exchange_error_display() {
    assert_eq!(
        format!("{}", ExchangeError::InvalidTimeout),
        "timeout budget must be greater than zero"
    );
    assert_eq!(
        format!("{}", ExchangeError::CompletionHookAlreadySet),
        "completion hook already set"
    );
}

#[test]
fn test_controller_error_display() {
    let err = ControllerError::InvalidConfig("io_threads must be greater than 0".to_string());
    assert_eq!(
        format!("{err}"),
        "invalid configuration: io_threads must be greater than 0"
    );
    assert_eq!(format!("{}", ControllerError::Closed), "controller closed");
}
