//! Benchmarks for the resource runtime.
//!
//! Benchmarks cover:
//! - Lock registry acquire/release, contended and uncontended
//! - Task registry register/finish
//! - Scheduler round trips, bare and against a resource

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use resource_runtime::builders::RuntimeBuilder;
use resource_runtime::config::{RuntimeConfig, WorkerPoolConfig};
use resource_runtime::core::{
    ErrorCallback, LockRegistry, Resource, ResultCallback, RtResult, RuntimeError, TaskRegistry,
};
use resource_runtime::infra::FactoryLoader;
use resource_runtime::util::{Attributes, ResourceKey, ResourcePath, TaskToken, Value};
use resource_runtime::Runtime;

// ============================================================================
// Bench Resource
// ============================================================================

struct Echo {
    key: ResourceKey,
}

impl Resource for Echo {
    fn key(&self) -> ResourceKey {
        self.key
    }

    fn invoke(
        &mut self,
        _method: &str,
        args: Vec<Value>,
        on_result: ResultCallback,
        _on_error: ErrorCallback,
    ) -> RtResult<TaskToken> {
        on_result(args.into_iter().next().unwrap_or(Value::Null));
        Ok(TaskToken::new(self.key, 0))
    }

    fn resume_from_network(&mut self, token: TaskToken, _value: Value) -> RtResult<()> {
        Err(RuntimeError::UnknownTask(token))
    }

    fn resume_with_error(&mut self, token: TaskToken, _error: RuntimeError) -> RtResult<()> {
        Err(RuntimeError::UnknownTask(token))
    }

    fn resume_from_timer(&mut self, token: TaskToken, _elapsed: Duration) -> RtResult<()> {
        Err(RuntimeError::UnknownTask(token))
    }
}

fn build_runtime() -> Runtime {
    let loader = FactoryLoader::new().with_module("echo", |key, _attributes, _args| {
        let resource: Box<dyn Resource> = Box::new(Echo { key });
        Ok(resource)
    });
    RuntimeBuilder::new(
        RuntimeConfig::new().with_pool(WorkerPoolConfig::new().with_worker_count(4)),
    )
    .with_loader(Arc::new(loader))
    .build()
    .unwrap()
}

// ============================================================================
// Lock Registry Benchmarks
// ============================================================================

fn bench_lock_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_acquire_release");

    let locks = LockRegistry::new();
    let key = ResourceKey::random();
    group.bench_function("same_key", |b| {
        b.iter(|| {
            let monitor = locks.acquire(black_box(key));
            monitor.release();
        });
    });

    group.bench_function("fresh_key", |b| {
        b.iter(|| {
            let monitor = locks.acquire(black_box(ResourceKey::random()));
            monitor.release();
        });
    });

    group.bench_function("try_acquire", |b| {
        b.iter(|| black_box(locks.try_acquire(key).is_some()));
    });
    group.finish();
}

fn bench_lock_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_contended");

    for threads in [2_u64, 4, 8] {
        group.throughput(Throughput::Elements(threads * 1_000));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                let locks = Arc::new(LockRegistry::new());
                let key = ResourceKey::random();
                b.iter(|| {
                    let workers: Vec<_> = (0..threads)
                        .map(|_| {
                            let locks = Arc::clone(&locks);
                            thread::spawn(move || {
                                for _ in 0..1_000 {
                                    drop(locks.acquire(key));
                                }
                            })
                        })
                        .collect();
                    for worker in workers {
                        worker.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Task Registry Benchmarks
// ============================================================================

fn bench_task_register_finish(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_register_finish");
    let tasks = TaskRegistry::started();
    let owner = ResourceKey::random();
    let mut serial = 0_u64;

    group.bench_function("register_then_finish", |b| {
        b.iter(|| {
            serial += 1;
            let token = TaskToken::new(owner, serial);
            tasks.register(token, |v| drop(black_box(v)), |_e| {}).unwrap();
            black_box(tasks.finish_with_result(token, Value::Null));
        });
    });
    group.finish();
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_scheduler_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_round_trip");
    let runtime = build_runtime();
    let key = runtime
        .context()
        .create(
            "echo",
            &ResourcePath::parse("bench/echo").unwrap(),
            &Attributes::new(),
            vec![],
        )
        .unwrap();

    group.bench_function("submit", |b| {
        b.iter(|| {
            runtime
                .scheduler()
                .submit(|| Ok(black_box(1)), |_err: &RuntimeError| {})
                .wait()
                .unwrap()
        });
    });

    group.bench_function("invoke", |b| {
        b.iter(|| {
            runtime
                .context()
                .invoke(key, "echo", vec![Value::from(1)])
                .wait()
                .unwrap()
        });
    });

    for batch in [10_u64, 100] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::new("invoke_batch", batch), &batch, |b, &batch| {
            b.iter(|| {
                let handles: Vec<_> = (0..batch)
                    .map(|i| runtime.context().invoke(key, "echo", vec![Value::from(i)]))
                    .collect();
                for handle in handles {
                    black_box(handle.wait().unwrap());
                }
            });
        });
    }
    group.finish();
    runtime.shutdown();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(lock_benches, bench_lock_acquire_release, bench_lock_contended);

criterion_group!(task_benches, bench_task_register_finish);

criterion_group!(scheduler_benches, bench_scheduler_round_trip);

criterion_main!(lock_benches, task_benches, scheduler_benches);
