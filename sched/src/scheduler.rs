//! `JobScheduler`: owns one job's timer and dispatches concurrent attempts
//! through a `JobExecutor` on each tick.
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use sched_core::{Id, Result};

use crate::delay::DelayCalculator;
use crate::executor::{JobExecutor, JobHandler};
use crate::model::{JobDescription, JobResult, Schedule, SchedulerStatus};
use crate::repository::{ExecutionsRepository, JobRepository};
use crate::timer::{SafeTimer, TimerHandle};

struct Inner {
    name: String,
    schedule_id: Id,
    jobs: Arc<dyn JobRepository>,
    executions: Arc<dyn ExecutionsRepository>,
    handler: Arc<dyn JobHandler>,
    executor: JobExecutor,
    timer: Mutex<Option<TimerHandle>>,
    started: AtomicBool,
    unexpected_error_count: AtomicU64,
}

/// A cheaply-cloneable handle to one job's scheduler. Cloning shares the
/// same timer and counters; it does not create a second scheduler.
#[derive(Clone)]
pub struct JobScheduler(Arc<Inner>);

impl JobScheduler {
    pub fn new(
        name: impl Into<String>,
        schedule_id: Id,
        jobs: Arc<dyn JobRepository>,
        executions: Arc<dyn ExecutionsRepository>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let name = name.into();
        let executor = JobExecutor::new(schedule_id, executions.clone(), jobs.clone());
        Self(Arc::new(Inner {
            name,
            schedule_id,
            jobs,
            executions,
            handler,
            executor,
            timer: Mutex::new(None),
            started: AtomicBool::new(false),
            unexpected_error_count: AtomicU64::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Idempotent: stops any existing timer first. Loads the job entity by
    /// name; if it is missing, logs and returns without starting. Returns
    /// `Err` only for an unparsable `interval`/`cronSchedule` on the stored
    /// entity, a caller contract violation since `define` should have
    /// rejected that schedule already.
    pub async fn start(&self) -> Result<()> {
        self.stop().await;

        let Some(entity) = self.0.jobs.find_one(&self.0.name).await? else {
            tracing::warn!(job = %self.0.name, "scheduleJob: jobNotFound");
            return Ok(());
        };

        self.0.executor.reset();

        match entity.schedule {
            Schedule::Interval {
                interval,
                first_run_after_ms,
            } => {
                let interval_ms = DelayCalculator::parse_interval_ms(&interval)?;
                let last_started = entity.execution_info.as_ref().and_then(|i| i.last_started);
                let delay_ms =
                    DelayCalculator::delay_from_interval(interval_ms, last_started, first_run_after_ms);

                let scheduler = self.clone();
                let handle = SafeTimer::schedule_repeating(
                    "job-interval-tick",
                    Duration::from_millis(interval_ms),
                    Duration::from_millis(delay_ms),
                    move || {
                        let scheduler = scheduler.clone();
                        async move {
                            scheduler.tick().await;
                            Ok(())
                        }
                    },
                );
                *self.0.timer.lock().await = Some(handle);
            }
            Schedule::Cron { cron_schedule } => {
                // Validate eagerly so a bad expression throws before any
                // timer is installed.
                DelayCalculator::delay_from_cron(&cron_schedule)?;
                let handle = schedule_next_cron_fire(self.clone(), cron_schedule).await;
                *self.0.timer.lock().await = Some(handle);
            }
        }

        self.0.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Reload the job entity, compute the dispatch budget, and launch that
    /// many fire-and-forget attempts. Any repository error here is routed
    /// through the unexpected-error counter rather than propagated; the
    /// timer must survive.
    pub async fn tick(&self) {
        let entity = match self.0.jobs.find_one(&self.0.name).await {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                tracing::warn!(job = %self.0.name, "executeJob: jobNotFound");
                return;
            }
            Err(err) => {
                self.handle_unexpected_error(&err.to_string());
                return;
            }
        };

        let running = match self.0.executions.count_running_executions(&self.0.name).await {
            Ok(running) => running,
            Err(err) => {
                self.handle_unexpected_error(&err.to_string());
                return;
            }
        };

        let num_to_execute = entity.num_to_execute(running);
        for _ in 0..num_to_execute {
            let scheduler = self.clone();
            tokio::spawn(async move {
                if let Err(err) = scheduler.execute_once().await {
                    scheduler.handle_unexpected_error(&err.to_string());
                }
            });
        }
    }

    /// One synchronous attempt through the executor, with no concurrency or
    /// `max_running` math beyond the executor's own admission check.
    pub async fn execute_once(&self) -> Result<JobResult> {
        self.0.executor.execute(&self.0.name, self.0.handler.as_ref()).await
    }

    /// Cancel the timer, signal the executor to stop, and remove this
    /// schedule's running records for this job. Idempotent.
    pub async fn stop(&self) {
        if let Some(handle) = self.0.timer.lock().await.take() {
            handle.stop();
        }
        self.0.executor.stop();
        if let Err(err) = self.0.executions.remove_job(self.0.schedule_id, &self.0.name).await {
            tracing::error!(job = %self.0.name, error = %err, "internalError: failed to remove running records on stop");
        }
        self.0.started.store(false, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.0.started.load(Ordering::SeqCst)
    }

    pub async fn job_description(&self) -> Result<Option<JobDescription>> {
        let Some(entity) = self.0.jobs.find_one(&self.0.name).await? else {
            return Ok(None);
        };

        let scheduler_status = if self.is_started() {
            let running = self.0.executions.count_running_executions(&self.0.name).await?;
            Some(SchedulerStatus {
                schedule: entity.schedule.clone(),
                running,
            })
        } else {
            None
        };

        Ok(Some(JobDescription {
            name: entity.name,
            schedule: entity.schedule,
            concurrency: entity.concurrency,
            max_running: entity.max_running,
            execution_info: entity.execution_info,
            scheduler_status,
        }))
    }

    pub fn unexpected_error_count(&self) -> u64 {
        self.0.unexpected_error_count.load(Ordering::SeqCst)
    }

    fn handle_unexpected_error(&self, message: &str) {
        self.0.unexpected_error_count.fetch_add(1, Ordering::SeqCst);
        tracing::error!(job = %self.0.name, error = %message, "executeJob: unexpected error");
    }
}

/// Installs a one-shot timer at the next cron fire instant; its callback
/// runs a tick and then reschedules another one-shot. Boxed because this is
/// indirect async recursion (the callback calls back into this function).
fn schedule_next_cron_fire(
    scheduler: JobScheduler,
    cron_schedule: String,
) -> Pin<Box<dyn Future<Output = TimerHandle> + Send>> {
    Box::pin(async move {
        let delay_ms = match DelayCalculator::delay_from_cron(&cron_schedule) {
            Ok(ms) => ms,
            Err(err) => {
                scheduler.handle_unexpected_error(&err.to_string());
                // Fall back to re-checking in a second; a transient parse
                // failure here would otherwise wedge the cron loop forever.
                1000
            }
        };

        let inner_scheduler = scheduler.clone();
        let inner_cron = cron_schedule.clone();
        SafeTimer::schedule_once(
            "job-cron-tick",
            Duration::from_millis(delay_ms),
            move || async move {
                inner_scheduler.tick().await;
                let handle = schedule_next_cron_fire(inner_scheduler.clone(), inner_cron).await;
                *inner_scheduler.0.timer.lock().await = Some(handle);
                Ok(())
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryExecutionsRepository, InMemoryJobRepository};
    use crate::model::JobDefinition;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingHandler(Arc<AtomicU32>);

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn execute(&self) -> std::result::Result<Option<serde_json::Value>, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn interval_job(name: &str, interval: &str, first_run_after_ms: u64) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            schedule: Schedule::Interval {
                interval: interval.to_string(),
                first_run_after_ms,
            },
            concurrency: 1,
            max_running: 0,
            execution_info: None,
        }
    }

    #[tokio::test]
    async fn interval_job_fires_on_schedule() {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        jobs.save(interval_job("j", "50 milliseconds", 0)).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = JobScheduler::new(
            "j",
            Id::new(),
            jobs,
            executions,
            Arc::new(CountingHandler(calls.clone())),
        );

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.stop().await;

        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_leaves_one_timer() {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        jobs.save(interval_job("j", "30 milliseconds", 0)).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = JobScheduler::new(
            "j",
            Id::new(),
            jobs,
            executions,
            Arc::new(CountingHandler(calls.clone())),
        );

        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_one_start_cycle = calls.load(Ordering::SeqCst);
        scheduler.stop().await;
        scheduler.stop().await;

        // Two starts back to back should not double the firing rate.
        assert!(after_one_start_cycle < 10);
    }

    #[tokio::test]
    async fn missing_job_skips_start_without_error() {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = JobScheduler::new(
            "missing",
            Id::new(),
            jobs,
            executions,
            Arc::new(CountingHandler(calls.clone())),
        );

        scheduler.start().await.unwrap();
        assert!(!scheduler.is_started());
    }

    #[tokio::test]
    async fn unparsable_interval_throws_before_timer_installed() {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        jobs.save(interval_job("j", "not an interval", 0)).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = JobScheduler::new(
            "j",
            Id::new(),
            jobs,
            executions,
            Arc::new(CountingHandler(calls)),
        );

        assert!(scheduler.start().await.is_err());
    }

    #[tokio::test]
    async fn tick_dispatches_min_of_concurrency_and_remaining_budget() {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        jobs.save(JobDefinition {
            concurrency: 3,
            max_running: 3,
            ..interval_job("j", "1 hour", 0)
        })
        .await
        .unwrap();

        // Pre-seed one running execution from a peer instance.
        executions.add_execution(Id::new(), "j", 3).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = JobScheduler::new(
            "j",
            Id::new(),
            jobs,
            executions,
            Arc::new(CountingHandler(calls.clone())),
        );

        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn job_description_reports_scheduler_status_only_when_started() {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        jobs.save(interval_job("j", "1 hour", 0)).await.unwrap();

        let scheduler = JobScheduler::new(
            "j",
            Id::new(),
            jobs,
            executions,
            Arc::new(CountingHandler(Arc::new(AtomicU32::new(0)))),
        );

        let before = scheduler.job_description().await.unwrap().unwrap();
        assert!(before.scheduler_status.is_none());

        scheduler.start().await.unwrap();
        let after = scheduler.job_description().await.unwrap().unwrap();
        assert!(after.scheduler_status.is_some());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn cron_job_fires_and_stop_prevents_further_fires() {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionsRepository::new());
        jobs.save(JobDefinition {
            name: "cron-j".to_string(),
            schedule: Schedule::Cron {
                cron_schedule: "* * * * * *".to_string(),
            },
            concurrency: 1,
            max_running: 0,
            execution_info: None,
        })
        .await
        .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = JobScheduler::new(
            "cron-j",
            Id::new(),
            jobs,
            executions,
            Arc::new(CountingHandler(calls.clone())),
        );

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        scheduler.stop().await;
        let after_stop = calls.load(Ordering::SeqCst);
        assert!(after_stop >= 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }
}
