//! Delivery of resume events to suspended resource calls.
//!
//! Each event becomes a scheduled operation on the owning resource, so the
//! resume runs under the resource's monitor like any other call. A resume
//! that finds its task already resolved, or its resource already destroyed,
//! lost a race and is dropped quietly.

use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::core::result_handle::ResultHandle;
use crate::core::scheduler::Scheduler;
use crate::core::RuntimeError;
use crate::util::ids::{ResourceKey, TaskToken, Value};

/// Routes timer, network and error resumes through the scheduler.
#[derive(Debug, Clone)]
pub struct ResumeService {
    scheduler: Scheduler,
}

fn log_failure(token: TaskToken, source: &'static str) -> impl FnOnce(&RuntimeError) + Send {
    move |err: &RuntimeError| warn!(token = %token, source, error = %err, "Resume failed")
}

impl ResumeService {
    /// Resume service on top of `scheduler`.
    #[must_use]
    pub const fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Call `resume_from_timer` on the resource with `key` once `delay` has
    /// elapsed. The resource receives the time actually elapsed since this
    /// call.
    pub fn resume_after_delay(
        &self,
        key: ResourceKey,
        delay: Duration,
        token: TaskToken,
    ) -> ResultHandle<()> {
        let scheduled_at = Instant::now();
        trace!(key = %key, token = %token, delay_ms = delay.as_millis() as u64, "Timer resume scheduled");
        self.scheduler.perform_tolerating_races(
            key,
            Some(delay),
            move |resource| resource.resume_from_timer(token, scheduled_at.elapsed()),
            log_failure(token, "timer"),
        )
    }

    /// Deliver a network reply to the suspended call `token`.
    pub fn resume_from_network(
        &self,
        key: ResourceKey,
        token: TaskToken,
        value: Value,
    ) -> ResultHandle<()> {
        trace!(key = %key, token = %token, "Network resume");
        self.scheduler.perform_tolerating_races(
            key,
            None,
            move |resource| resource.resume_from_network(token, value),
            log_failure(token, "network"),
        )
    }

    /// Fail the suspended call `token` with `error`.
    pub fn resume_with_error(
        &self,
        key: ResourceKey,
        token: TaskToken,
        error: RuntimeError,
    ) -> ResultHandle<()> {
        trace!(key = %key, token = %token, error = %error, "Error resume");
        self.scheduler.perform_tolerating_races(
            key,
            None,
            move |resource| resource.resume_with_error(token, error),
            log_failure(token, "error"),
        )
    }
}
