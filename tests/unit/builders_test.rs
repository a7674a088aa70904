//! Tests for the runtime builder

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resource_runtime::builders::RuntimeBuilder;
use resource_runtime::config::{RuntimeConfig, WorkerPoolConfig};
use resource_runtime::core::{ErrorHandler, RuntimeError, TaskRegistry};
use resource_runtime::util::{Attributes, ResourcePath};

fn small_config() -> RuntimeConfig {
    RuntimeConfig::new().with_pool(WorkerPoolConfig::new().with_worker_count(2))
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = RuntimeConfig::new().with_pool(WorkerPoolConfig::new().with_worker_count(0));
    let err = RuntimeBuilder::new(config).build().unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidConfig(_)));
}

#[test]
fn test_builder_defaults() {
    let runtime = RuntimeBuilder::new(small_config()).build().unwrap();

    assert!(runtime.scheduler().is_accepting());
    assert!(runtime.tasks().is_running());
    assert!(runtime.locks().is_reclaiming());
    assert_eq!(runtime.config().pool.worker_count, 2);

    // The default loader knows no modules.
    let err = runtime
        .context()
        .create(
            "anything",
            &ResourcePath::parse("a").unwrap(),
            &Attributes::new(),
            vec![],
        )
        .unwrap_err();
    assert_eq!(err, RuntimeError::ModuleNotFound("anything".into()));

    runtime.shutdown();
    assert!(!runtime.scheduler().is_accepting());
    assert!(!runtime.tasks().is_running());
    assert!(!runtime.locks().is_reclaiming());
}

#[test]
fn test_builder_starts_shared_task_registry() {
    let tasks = Arc::new(TaskRegistry::new());
    assert!(!tasks.is_running());

    let runtime = RuntimeBuilder::new(small_config())
        .with_task_registry(Arc::clone(&tasks))
        .build()
        .unwrap();

    assert!(tasks.is_running());
    assert!(Arc::ptr_eq(runtime.tasks(), &tasks));
    runtime.shutdown();
}

#[test]
fn test_builder_error_handler_sees_failed_jobs() {
    let failures = Arc::new(AtomicUsize::new(0));
    let handler: ErrorHandler = {
        let failures = Arc::clone(&failures);
        Arc::new(move |_err: &RuntimeError| {
            failures.fetch_add(1, Ordering::SeqCst);
        })
    };

    let runtime = RuntimeBuilder::new(small_config())
        .with_error_handler(handler)
        .build()
        .unwrap();

    let handle = runtime.scheduler().submit(
        || Err::<(), _>(RuntimeError::operation("nope")),
        |_err: &RuntimeError| {},
    );
    assert!(handle.wait_timeout(Duration::from_secs(5)).is_err());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while failures.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    runtime.shutdown();
}
