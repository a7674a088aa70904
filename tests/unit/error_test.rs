//! Tests for error types

use resource_runtime::core::{PoolError, RuntimeError};
use resource_runtime::util::{ResourceKey, TaskToken};

#[test]
fn test_error_messages() {
    assert_eq!(
        RuntimeError::ResourceNotFound("a/b".into()).to_string(),
        "resource not found: a/b"
    );
    assert_eq!(
        RuntimeError::MethodNotFound("ping".into()).to_string(),
        "method not found: ping"
    );
    assert_eq!(
        RuntimeError::TaskKilled.to_string(),
        "task killed: task registry stopped"
    );
    assert_eq!(RuntimeError::Canceled.to_string(), "canceled");
}

#[test]
fn test_operation_constructor() {
    let err = RuntimeError::operation(format_args!("code {}", 7));
    assert_eq!(err, RuntimeError::Operation("code 7".into()));
}

#[test]
fn test_from_panic_payloads() {
    let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
    assert_eq!(
        RuntimeError::from_panic(payload.as_ref()),
        RuntimeError::Panicked("static message".into())
    );

    let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned message"));
    assert_eq!(
        RuntimeError::from_panic(payload.as_ref()),
        RuntimeError::Panicked("owned message".into())
    );

    let payload: Box<dyn std::any::Any + Send> = Box::new(42_u32);
    assert!(matches!(
        RuntimeError::from_panic(payload.as_ref()),
        RuntimeError::Panicked(_)
    ));
}

#[test]
fn test_benign_races() {
    let token = TaskToken::new(ResourceKey::random(), 1);
    assert!(RuntimeError::UnknownTask(token).is_benign_race());
    assert!(RuntimeError::ResourceNotFound("x".into()).is_benign_race());
    assert!(!RuntimeError::TaskKilled.is_benign_race());
    assert!(!RuntimeError::operation("x").is_benign_race());
}

#[test]
fn test_pool_error_converts() {
    let err: RuntimeError = PoolError::QueueFull.into();
    assert!(matches!(err, RuntimeError::Pool(PoolError::QueueFull)));
}
