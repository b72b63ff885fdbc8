//! `SchedulePing`: per-instance liveness heartbeat and leader election over
//! a shared `ExecutionsRepository`. At most one instance per schedule name
//! is "active" at a time; only the active instance's `start_all_jobs`
//! callback has been invoked.
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use sched_core::{Id, Result};

use crate::repository::ExecutionsRepository;
use crate::timer::{SafeTimer, TimerHandle};

type StartAllJobs = dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

struct Inner {
    schedule_id: Id,
    name: String,
    ping_interval_ms: u64,
    stale_after_ms: u64,
    executions: Arc<dyn ExecutionsRepository>,
    start_all_jobs: Arc<StartAllJobs>,
    active: AtomicBool,
    timer: Mutex<Option<TimerHandle>>,
}

#[derive(Clone)]
pub struct SchedulePing(Arc<Inner>);

impl SchedulePing {
    pub fn new(
        name: impl Into<String>,
        ping_interval_ms: u64,
        stale_after_ms: u64,
        executions: Arc<dyn ExecutionsRepository>,
        start_all_jobs: Arc<StartAllJobs>,
    ) -> Self {
        Self(Arc::new(Inner {
            schedule_id: Id::new(),
            name: name.into(),
            ping_interval_ms,
            stale_after_ms,
            executions,
            start_all_jobs,
            active: AtomicBool::new(false),
            timer: Mutex::new(None),
        }))
    }

    pub fn schedule_id(&self) -> Id {
        self.0.schedule_id
    }

    pub fn is_active(&self) -> bool {
        self.0.active.load(Ordering::SeqCst)
    }

    /// Synchronous initial arbitration, then installs the repeating
    /// heartbeat timer.
    pub async fn start(&self) {
        match self.try_activate().await {
            Ok(true) => self.invoke_start_all_jobs().await,
            Ok(false) => {}
            Err(err) => {
                tracing::error!(schedule = %self.0.name, error = %err, "internalError: initial arbitration failed");
            }
        }

        let this = self.clone();
        let handle = SafeTimer::schedule_repeating(
            "schedule-ping-tick",
            Duration::from_millis(self.0.ping_interval_ms),
            Duration::from_millis(self.0.ping_interval_ms),
            move || {
                let this = this.clone();
                async move {
                    this.tick().await;
                    Ok(())
                }
            },
        );
        *self.0.timer.lock().await = Some(handle);
    }

    /// Cancel the heartbeat timer and delete this instance's liveness row,
    /// best-effort. Idempotent.
    pub async fn stop(&self) {
        if let Some(handle) = self.0.timer.lock().await.take() {
            handle.stop();
        }
        if let Err(err) = self.0.executions.delete_one(self.0.schedule_id).await {
            tracing::error!(schedule = %self.0.name, error = %err, "internalError: failed to delete liveness row");
        }
        self.0.active.store(false, Ordering::SeqCst);
    }

    async fn tick(&self) {
        if let Err(err) = self.0.executions.ping(self.0.schedule_id).await {
            tracing::error!(schedule = %self.0.name, error = %err, "internalError: ping failed");
        }

        if let Err(err) = self.0.executions.clean(self.0.stale_after_ms).await {
            tracing::error!(schedule = %self.0.name, error = %err, "internalError: clean failed");
        }

        if !self.is_active() {
            match self.try_activate().await {
                Ok(true) => self.invoke_start_all_jobs().await,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(schedule = %self.0.name, error = %err, "internalError: arbitration retry failed");
                }
            }
        }
    }

    async fn try_activate(&self) -> Result<bool> {
        if self.is_active() {
            return Ok(true);
        }
        if !self
            .0
            .executions
            .is_active_schedule(&self.0.name, self.0.schedule_id, self.0.stale_after_ms)
            .await?
        {
            return Ok(false);
        }
        let claimed = self
            .0
            .executions
            .set_active_schedule(&self.0.name, self.0.schedule_id, self.0.stale_after_ms)
            .await?;
        if claimed {
            self.0.active.store(true, Ordering::SeqCst);
        }
        Ok(claimed)
    }

    async fn invoke_start_all_jobs(&self) {
        tracing::info!(schedule = %self.0.name, schedule_id = %self.0.schedule_id, "schedule became active");
        (self.0.start_all_jobs)().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryExecutionsRepository;
    use std::sync::atomic::AtomicU32;

    fn counting_start_all_jobs(counter: Arc<AtomicU32>) -> Arc<StartAllJobs> {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn first_instance_becomes_active_and_starts_jobs_once() {
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        let starts = Arc::new(AtomicU32::new(0));
        let ping = SchedulePing::new(
            "s",
            30,
            1000,
            executions,
            counting_start_all_jobs(starts.clone()),
        );

        ping.start().await;
        assert!(ping.is_active());
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        ping.stop().await;
    }

    #[tokio::test]
    async fn second_instance_stays_passive_while_first_is_alive() {
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        let starts_a = Arc::new(AtomicU32::new(0));
        let starts_b = Arc::new(AtomicU32::new(0));

        let a = SchedulePing::new("s", 30, 1000, executions.clone(), counting_start_all_jobs(starts_a.clone()));
        let b = SchedulePing::new("s", 30, 1000, executions.clone(), counting_start_all_jobs(starts_b.clone()));

        a.start().await;
        b.start().await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(a.is_active());
        assert!(!b.is_active());
        assert_eq!(starts_a.load(Ordering::SeqCst), 1);
        assert_eq!(starts_b.load(Ordering::SeqCst), 0);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn standby_takes_over_after_leader_goes_stale() {
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        let starts_a = Arc::new(AtomicU32::new(0));
        let starts_b = Arc::new(AtomicU32::new(0));

        let a = SchedulePing::new("s", 30, 150, executions.clone(), counting_start_all_jobs(starts_a.clone()));
        let b = SchedulePing::new("s", 30, 150, executions.clone(), counting_start_all_jobs(starts_b.clone()));

        a.start().await;
        b.start().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(a.is_active());
        assert!(!b.is_active());

        // Simulate a's death: stop its timer without deleting its liveness
        // row through the orderly stop path, so it goes stale naturally.
        if let Some(handle) = a.0.timer.lock().await.take() {
            handle.stop();
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(b.is_active());
        assert_eq!(starts_b.load(Ordering::SeqCst), 1);

        b.stop().await;
    }
}
