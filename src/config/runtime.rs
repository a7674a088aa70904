//! Runtime configuration: worker pool, lock registry, timer and handlers.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

const DEFAULT_QUEUE_DEPTH: usize = 10_000;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_RECLAIM_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_IDLE_HANDLERS: usize = 4;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of dedicated worker threads.
    pub worker_count: usize,
    /// Maximum queued jobs before submissions are rejected.
    pub max_queue_depth: usize,
    /// Stack size for each worker thread in bytes.
    pub thread_stack_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(2),
            max_queue_depth: DEFAULT_QUEUE_DEPTH,
            thread_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl WorkerPoolConfig {
    /// Defaults sized to the host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker thread count.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the maximum queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}

/// Lock registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockRegistryConfig {
    /// Interval between background reclamation sweeps.
    pub reclaim_interval_ms: u64,
}

impl Default for LockRegistryConfig {
    fn default() -> Self {
        Self {
            reclaim_interval_ms: DEFAULT_RECLAIM_INTERVAL_MS,
        }
    }
}

impl LockRegistryConfig {
    /// Sweep interval as a duration.
    #[must_use]
    pub const fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }
}

/// Timer facility configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Threads driving the timer runtime. Timer threads only hand work to
    /// the worker pool, so one is usually enough.
    pub worker_threads: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { worker_threads: 1 }
    }
}

/// Ephemeral handler service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Idle resources the retained handler service keeps per module.
    pub max_idle_per_module: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_idle_per_module: DEFAULT_MAX_IDLE_HANDLERS,
        }
    }
}

/// Root runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool settings.
    pub pool: WorkerPoolConfig,
    /// Lock registry settings.
    pub locks: LockRegistryConfig,
    /// Timer settings.
    pub timer: TimerConfig,
    /// Handler service settings.
    pub handlers: HandlerConfig,
    /// Upper bound on waiting for workers during shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default(),
            locks: LockRegistryConfig::default(),
            timer: TimerConfig::default(),
            handlers: HandlerConfig::default(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl RuntimeConfig {
    /// Defaults sized to the host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the worker pool section.
    #[must_use]
    pub fn with_pool(mut self, pool: WorkerPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the reclamation sweep interval.
    #[must_use]
    pub const fn with_reclaim_interval_ms(mut self, reclaim_interval_ms: u64) -> Self {
        self.locks.reclaim_interval_ms = reclaim_interval_ms;
        self
    }

    /// Set how many idle resources the retained handler service keeps per
    /// module.
    #[must_use]
    pub const fn with_max_idle_handlers(mut self, max_idle_per_module: usize) -> Self {
        self.handlers.max_idle_per_module = max_idle_per_module;
        self
    }

    /// Shutdown timeout as a duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        if self.locks.reclaim_interval_ms == 0 {
            return Err("locks.reclaim_interval_ms must be greater than 0".into());
        }
        if self.timer.worker_threads == 0 {
            return Err("timer.worker_threads must be greater than 0".into());
        }
        if self.shutdown_timeout_secs == 0 {
            return Err("shutdown_timeout_secs must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse runtime configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading runtime config {}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading runtime config {}", path.display()))
    }

    /// Defaults overridden by `RT_*` environment variables, after loading a
    /// `.env` file if one is present.
    ///
    /// # Errors
    ///
    /// Fails if a variable is set but does not parse, or validation fails.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::new();
        override_from_env("RT_WORKER_COUNT", &mut cfg.pool.worker_count)?;
        override_from_env("RT_MAX_QUEUE_DEPTH", &mut cfg.pool.max_queue_depth)?;
        override_from_env("RT_THREAD_STACK_SIZE", &mut cfg.pool.thread_stack_size)?;
        override_from_env("RT_RECLAIM_INTERVAL_MS", &mut cfg.locks.reclaim_interval_ms)?;
        override_from_env("RT_TIMER_THREADS", &mut cfg.timer.worker_threads)?;
        override_from_env("RT_MAX_IDLE_HANDLERS", &mut cfg.handlers.max_idle_per_module)?;
        override_from_env("RT_SHUTDOWN_TIMEOUT_SECS", &mut cfg.shutdown_timeout_secs)?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn override_from_env<T>(name: &str, slot: &mut T) -> AppResult<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = std::env::var(name) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("{name}={raw} is not valid"))?;
    }
    Ok(())
}
