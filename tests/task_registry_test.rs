//! Task registry integration tests: exactly-once resolution across threads,
//! duplicate registration and kill-on-stop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use resource_runtime::core::{RuntimeError, TaskRegistry};
use resource_runtime::util::{ResourceKey, TaskToken, Value};
use serde_json::json;

fn token() -> TaskToken {
    TaskToken::new(ResourceKey::random(), 1)
}

fn counting(
    results: &Arc<AtomicUsize>,
    errors: &Arc<AtomicUsize>,
) -> (
    impl FnOnce(Value) + Send + 'static,
    impl FnOnce(RuntimeError) + Send + 'static,
) {
    let results = Arc::clone(results);
    let errors = Arc::clone(errors);
    (
        move |_value: Value| {
            results.fetch_add(1, Ordering::SeqCst);
        },
        move |_err: RuntimeError| {
            errors.fetch_add(1, Ordering::SeqCst);
        },
    )
}

#[test]
fn test_concurrent_finishers_resolve_exactly_once() {
    let tasks = Arc::new(TaskRegistry::started());
    let results = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    let token = token();

    let (on_result, on_error) = counting(&results, &errors);
    tasks.register(token, on_result, on_error).unwrap();

    let winners: usize = (0..8)
        .map(|i| {
            let tasks = Arc::clone(&tasks);
            thread::spawn(move || {
                if i % 2 == 0 {
                    tasks.finish_with_result(token, json!(i))
                } else {
                    tasks.finish_with_error(token, RuntimeError::operation(i))
                }
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|worker| usize::from(worker.join().unwrap()))
        .sum();

    assert_eq!(winners, 1);
    assert_eq!(
        results.load(Ordering::SeqCst) + errors.load(Ordering::SeqCst),
        1
    );
    assert!(!tasks.contains(&token));
}

#[test]
fn test_duplicate_registration_keeps_original_callbacks() {
    let tasks = TaskRegistry::started();
    let token = token();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&seen);
    tasks
        .register(
            token,
            move |value| first.lock().push(("first", value)),
            |_err| {},
        )
        .unwrap();

    let second = Arc::clone(&seen);
    let err = tasks
        .register(
            token,
            move |value| second.lock().push(("second", value)),
            |_err| {},
        )
        .unwrap_err();
    assert_eq!(err, RuntimeError::DuplicateTask(token));

    assert!(tasks.finish_with_result(token, json!("done")));
    assert_eq!(*seen.lock(), vec![("first", json!("done"))]);
}

#[test]
fn test_attached_callbacks_fire_in_order() {
    let tasks = TaskRegistry::started();
    let token = token();
    let order = Arc::new(Mutex::new(Vec::new()));

    for label in ["a", "b", "c"] {
        let order = Arc::clone(&order);
        let on_error = |_err: RuntimeError| {};
        if label == "a" {
            tasks
                .register(token, move |_v| order.lock().push(label), on_error)
                .unwrap();
        } else {
            tasks
                .attach(token, move |_v| order.lock().push(label), on_error)
                .unwrap();
        }
    }

    assert!(tasks.finish_with_result(token, Value::Null));
    assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    assert_eq!(
        tasks.attach(token, |_v| {}, |_e| {}),
        Err(RuntimeError::UnknownTask(token))
    );
}

#[test]
fn test_panicking_callback_does_not_block_the_rest() {
    let tasks = TaskRegistry::started();
    let token = token();
    let reached = Arc::new(AtomicUsize::new(0));

    tasks
        .register(token, |_v| panic!("callback blew up"), |_e| {})
        .unwrap();
    let after = Arc::clone(&reached);
    tasks
        .attach(
            token,
            move |_v| {
                after.fetch_add(1, Ordering::SeqCst);
            },
            |_e| {},
        )
        .unwrap();

    assert!(tasks.finish_with_result(token, Value::Null));
    assert_eq!(reached.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stop_kills_everything_and_restart_is_empty() {
    let tasks = TaskRegistry::started();
    let results = Arc::new(AtomicUsize::new(0));
    let killed = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..5 {
        let results = Arc::clone(&results);
        let killed = Arc::clone(&killed);
        tasks
            .register(
                token(),
                move |_v| {
                    results.fetch_add(1, Ordering::SeqCst);
                },
                move |err| killed.lock().push(err),
            )
            .unwrap();
    }
    assert_eq!(tasks.outstanding(), 5);

    assert_eq!(tasks.stop(), Ok(5));
    assert_eq!(results.load(Ordering::SeqCst), 0);
    assert_eq!(killed.lock().len(), 5);
    assert!(killed
        .lock()
        .iter()
        .all(|err| *err == RuntimeError::TaskKilled));

    assert!(!tasks.is_running());
    assert_eq!(tasks.stop(), Err(RuntimeError::NotRunning));
    assert_eq!(
        tasks.register(token(), |_v| {}, |_e| {}),
        Err(RuntimeError::NotRunning)
    );

    tasks.start().unwrap();
    assert_eq!(tasks.outstanding(), 0);
    assert_eq!(tasks.start(), Err(RuntimeError::AlreadyRunning));
}

#[test]
fn test_age_tracks_pending_tasks_only() {
    let tasks = TaskRegistry::started();
    let token = token();
    assert!(tasks.age(&token).is_none());

    tasks.register(token, |_v| {}, |_e| {}).unwrap();
    assert!(tasks.age(&token).is_some());

    assert!(tasks.finish_with_error(token, RuntimeError::Timeout));
    assert!(tasks.age(&token).is_none());
    assert!(!tasks.finish_with_error(token, RuntimeError::Timeout));
}
