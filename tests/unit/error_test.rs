//! Tests for error types

use prometheus_background::core::{JobError, PayloadError, TaskError};
use std::time::Duration;

#[test]
fn test_dispatch_failure_message() {
    let err = TaskError::DispatchFailure {
        attempts: 11,
        reason: "connection refused".into(),
    };
    assert_eq!(
        err.to_string(),
        "dispatch failed after 11 attempts: connection refused"
    );
}

#[test]
fn test_job_errors_wrap_into_task_errors() {
    let err: TaskError = JobError::Timeout(Duration::from_secs(3)).into();
    assert_eq!(err.to_string(), "work unit failed: timed out after 3s");
    assert!(!err.is_terminate());

    let err: TaskError = JobError::Terminate("respond".into()).into();
    assert!(err.is_terminate());
}

#[test]
fn test_payload_error_messages() {
    assert_eq!(
        PayloadError::UnknownJob("resize".into()).to_string(),
        "unknown job `resize`"
    );
    assert_eq!(
        PayloadError::MissingSecretKey.to_string(),
        "no secret key configured for signing"
    );
}

#[test]
fn test_not_found_message() {
    let err = TaskError::NotFound("task_abc".into());
    assert_eq!(format!("{err}"), "not found: task_abc");
}
