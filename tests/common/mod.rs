//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use resource_runtime::builders::RuntimeBuilder;
use resource_runtime::config::{RuntimeConfig, WorkerPoolConfig};
use resource_runtime::core::{
    ErrorCallback, Resource, ResultCallback, RtResult, RuntimeError, TaskRegistry,
};
use resource_runtime::infra::{FactoryLoader, InMemoryResourceRegistry};
use resource_runtime::util::{
    init_tracing_with, Attributes, ResourceKey, ResourcePath, TaskToken, Value,
};
use resource_runtime::Runtime;
use serde_json::json;

/// Upper bound for any wait in tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Module name the test loader knows.
pub const MODULE: &str = "test";

/// Resource whose methods cover every dispatch outcome.
///
/// - `echo`: completes with its first argument
/// - `count`: completes with how many calls it has seen
/// - `fail`: reports an error through the callback
/// - `error`: fails dispatch itself
/// - `defer`: suspends under token `(key, serial)`
/// - `sleep`: sleeps for its first argument in ms, then completes
/// - `panic`: panics
pub struct TestResource {
    key: ResourceKey,
    tasks: Arc<TaskRegistry>,
    calls: u64,
    closes: Arc<AtomicUsize>,
}

impl TestResource {
    pub fn new(key: ResourceKey, tasks: Arc<TaskRegistry>, closes: Arc<AtomicUsize>) -> Self {
        Self {
            key,
            tasks,
            calls: 0,
            closes,
        }
    }
}

impl Resource for TestResource {
    fn key(&self) -> ResourceKey {
        self.key
    }

    fn invoke(
        &mut self,
        method: &str,
        args: Vec<Value>,
        on_result: ResultCallback,
        on_error: ErrorCallback,
    ) -> RtResult<TaskToken> {
        self.calls += 1;
        let token = TaskToken::new(self.key, self.calls);
        match method {
            "echo" => on_result(args.into_iter().next().unwrap_or(Value::Null)),
            "count" => on_result(json!(self.calls)),
            "fail" => on_error(RuntimeError::operation("requested failure")),
            "error" => return Err(RuntimeError::operation("dispatch failed")),
            "defer" => self.tasks.register(token, on_result, on_error)?,
            "sleep" => {
                let ms = args.first().and_then(Value::as_u64).unwrap_or(10);
                thread::sleep(Duration::from_millis(ms));
                on_result(json!(ms));
            }
            "panic" => panic!("resource panicked"),
            other => return Err(RuntimeError::MethodNotFound(other.to_owned())),
        }
        Ok(token)
    }

    fn resume_from_network(&mut self, token: TaskToken, value: Value) -> RtResult<()> {
        if self.tasks.finish_with_result(token, value) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownTask(token))
        }
    }

    fn resume_with_error(&mut self, token: TaskToken, error: RuntimeError) -> RtResult<()> {
        if self.tasks.finish_with_error(token, error) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownTask(token))
        }
    }

    fn resume_from_timer(&mut self, token: TaskToken, elapsed: Duration) -> RtResult<()> {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if self.tasks.finish_with_result(token, json!(elapsed_ms)) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownTask(token))
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A running runtime plus handles on its collaborators.
pub struct Harness {
    pub runtime: Runtime,
    pub registry: Arc<InMemoryResourceRegistry>,
    pub tasks: Arc<TaskRegistry>,
    pub closes: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(
            RuntimeConfig::new()
                .with_pool(WorkerPoolConfig::new().with_worker_count(4))
                .with_reclaim_interval_ms(20),
        )
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        init_tracing_with("resource_runtime=warn");
        let registry = Arc::new(InMemoryResourceRegistry::new());
        let tasks = Arc::new(TaskRegistry::started());
        let closes = Arc::new(AtomicUsize::new(0));

        let loader = {
            let tasks = Arc::clone(&tasks);
            let closes = Arc::clone(&closes);
            FactoryLoader::new().with_module(MODULE, move |key, _attributes, _args| {
                let resource: Box<dyn Resource> = Box::new(TestResource::new(
                    key,
                    Arc::clone(&tasks),
                    Arc::clone(&closes),
                ));
                Ok(resource)
            })
        };

        let runtime = RuntimeBuilder::new(config)
            .with_registry(registry.clone())
            .with_loader(Arc::new(loader))
            .with_task_registry(Arc::clone(&tasks))
            .build()
            .unwrap();

        Self {
            runtime,
            registry,
            tasks,
            closes,
        }
    }

    /// Create a test resource at `path`.
    pub fn create(&self, at: &str) -> ResourceKey {
        self.runtime
            .context()
            .create(MODULE, &path(at), &Attributes::new(), Vec::new())
            .unwrap()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.runtime.shutdown();
    }
}

pub fn path(raw: &str) -> ResourcePath {
    ResourcePath::parse(raw).unwrap()
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
