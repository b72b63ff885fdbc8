//! `SafeTimer`: the interval/timeout primitives `JobScheduler` and
//! `SchedulePing` build their tick loops on. A callback's errors are caught
//! and logged rather than propagated, and an overlapping repeating tick is
//! dropped rather than queued, so a slow or failing callback can never wedge
//! or kill the timer.
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// An opaque handle to a scheduled timer. `stop` is idempotent and never
/// waits for an in-flight callback.
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel future fires. Does not block on an in-flight callback; a
    /// callback already running when `stop` is called runs to completion.
    pub fn stop(&self) {
        self.task.abort();
    }
}

pub struct SafeTimer;

impl SafeTimer {
    /// Fire `callback` once after `delay`.
    pub fn schedule_once<F, Fut>(label: &'static str, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = callback().await {
                tracing::error!(timer = label, error = %err, "timer callback failed");
            }
        });
        TimerHandle { task }
    }

    /// Fire `callback` after `initial_delay`, then every `interval`. If a
    /// previous invocation of `callback` is still running when the next
    /// scheduled instant arrives, that tick is dropped silently (logged at
    /// debug level) rather than queued or run concurrently.
    pub fn schedule_repeating<F, Fut>(
        label: &'static str,
        interval: Duration,
        initial_delay: Duration,
        callback: F,
    ) -> TimerHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let callback = Arc::new(callback);

        let task = tokio::spawn(async move {
            let in_flight = Arc::new(AtomicBool::new(false));
            let mut next_fire = Instant::now() + initial_delay;

            loop {
                sleep_until(next_fire).await;
                next_fire += interval;

                if in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    tracing::debug!(timer = label, "dropping overlapping tick");
                    continue;
                }

                let in_flight = in_flight.clone();
                let callback = callback.clone();
                tokio::spawn(async move {
                    if let Err(err) = callback().await {
                        tracing::error!(timer = label, error = %err, "timer callback failed");
                    }
                    in_flight.store(false, Ordering::SeqCst);
                });
            }
        });

        TimerHandle { task }
    }
}
