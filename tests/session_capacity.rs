//! Capacity behavior across real sessions sharing one limiter.

use std::time::Duration;

use facecast::{CaptureSession, PipelineError, SessionConfig, SessionLimiter, SessionStatus};

fn stub_config(name: &str) -> SessionConfig {
    SessionConfig {
        source_url: format!("stub://{}", name),
        output_url: "stub://sink".to_string(),
        output_width: 64,
        output_height: 48,
        fps: 100,
        ..SessionConfig::default()
    }
}

#[test]
fn the_limiter_caps_simultaneously_running_sessions() {
    let limiter = SessionLimiter::new(2);
    let first = CaptureSession::new(stub_config("one"), Vec::new(), limiter.clone()).unwrap();
    let second = CaptureSession::new(stub_config("two"), Vec::new(), limiter.clone()).unwrap();
    let third = CaptureSession::new(stub_config("three"), Vec::new(), limiter.clone()).unwrap();

    first.start().unwrap();
    second.start().unwrap();
    assert!(first.wait_until_ready(Duration::from_secs(5)));
    assert!(second.wait_until_ready(Duration::from_secs(5)));

    // The pool is exhausted: the third session is refused, not queued.
    match third.start() {
        Err(PipelineError::CapacityExceeded { capacity }) => assert_eq!(capacity, 2),
        other => panic!("expected CapacityExceeded, got {:?}", other.err()),
    }
    assert_eq!(third.status(), SessionStatus::Idle);

    // The refusal leaves the running sessions untouched.
    assert_eq!(first.status(), SessionStatus::Running);
    assert_eq!(second.status(), SessionStatus::Running);

    // Freed capacity is immediately usable.
    first.stop();
    assert_eq!(limiter.in_use(), 1);
    third.start().unwrap();
    assert!(third.wait_until_ready(Duration::from_secs(5)));

    second.stop();
    third.stop();
    assert_eq!(limiter.in_use(), 0);
}

#[test]
fn a_session_cannot_hold_more_than_one_permit() {
    let limiter = SessionLimiter::new(2);
    let session = CaptureSession::new(stub_config("solo"), Vec::new(), limiter.clone()).unwrap();

    session.start().unwrap();
    session.start().unwrap();
    session.start().unwrap();
    assert_eq!(limiter.in_use(), 1);

    session.stop();
    assert_eq!(limiter.in_use(), 0);
}
