//! `Scheduler`: the crate's ordinary entry point. Owns one `SchedulePing`
//! and one `JobScheduler` per registered job, and wires the ping's
//! `startAllJobs` hook to start every registered `JobScheduler` the moment
//! this instance becomes the active leader for its schedule name.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use sched_core::{Id, Result, SchedulerSettings};

use crate::executor::JobHandler;
use crate::model::{JobDefinition, JobDescription};
use crate::ping::SchedulePing;
use crate::repository::{ExecutionsRepository, JobRepository};
use crate::scheduler::JobScheduler;

pub struct Scheduler {
    jobs: Arc<dyn JobRepository>,
    executions: Arc<dyn ExecutionsRepository>,
    ping: SchedulePing,
    schedulers: Arc<RwLock<HashMap<String, JobScheduler>>>,
}

impl Scheduler {
    pub fn new(
        settings: &SchedulerSettings,
        jobs: Arc<dyn JobRepository>,
        executions: Arc<dyn ExecutionsRepository>,
    ) -> Self {
        let schedulers: Arc<RwLock<HashMap<String, JobScheduler>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let start_all_jobs_schedulers = schedulers.clone();
        let start_all_jobs = Arc::new(move || {
            let schedulers = start_all_jobs_schedulers.clone();
            Box::pin(async move {
                let snapshot: Vec<JobScheduler> = schedulers.read().await.values().cloned().collect();
                for scheduler in snapshot {
                    if let Err(err) = scheduler.start().await {
                        tracing::error!(job = scheduler.name(), error = %err, "scheduleJob: failed to start");
                    }
                }
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        });

        let ping = SchedulePing::new(
            settings.schedule_name.clone(),
            settings.ping_interval_ms,
            settings.stale_after_ms(),
            executions.clone(),
            start_all_jobs,
        );

        Self {
            jobs,
            executions,
            ping,
            schedulers,
        }
    }

    pub fn schedule_id(&self) -> Id {
        self.ping.schedule_id()
    }

    /// Validate and persist a job definition (C8's output goes here).
    pub async fn define(&self, job: JobDefinition) -> Result<()> {
        self.jobs.define(job).await
    }

    /// Register a handler for an already-defined job. If this instance is
    /// already the active leader, the job starts immediately; otherwise it
    /// starts the moment this instance becomes active.
    pub async fn schedule(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Result<()> {
        let name = name.into();
        let scheduler = JobScheduler::new(
            name.clone(),
            self.ping.schedule_id(),
            self.jobs.clone(),
            self.executions.clone(),
            handler,
        );

        let should_start_now = self.ping.is_active();
        self.schedulers.write().await.insert(name, scheduler.clone());

        if should_start_now {
            scheduler.start().await?;
        }
        Ok(())
    }

    /// Stop and forget a job's scheduler.
    pub async fn cancel(&self, name: &str) {
        if let Some(scheduler) = self.schedulers.write().await.remove(name) {
            scheduler.stop().await;
        }
    }

    /// Start this instance: arbitrate for leadership and begin heartbeating.
    pub async fn start(&self) {
        self.ping.start().await;
    }

    /// Stop the heartbeat and every registered job's scheduler.
    pub async fn stop(&self) {
        self.ping.stop().await;
        let snapshot: Vec<JobScheduler> = self.schedulers.read().await.values().cloned().collect();
        for scheduler in snapshot {
            scheduler.stop().await;
        }
    }

    pub async fn get_job(&self, name: &str) -> Result<Option<JobDefinition>> {
        self.jobs.find_one(name).await
    }

    pub async fn get_jobs(&self) -> Result<Vec<JobDefinition>> {
        self.jobs.list().await
    }

    pub async fn get_job_description(&self, name: &str) -> Result<Option<JobDescription>> {
        if let Some(scheduler) = self.schedulers.read().await.get(name).cloned() {
            return scheduler.job_description().await;
        }

        let Some(entity) = self.jobs.find_one(name).await? else {
            return Ok(None);
        };
        Ok(Some(JobDescription {
            name: entity.name,
            schedule: entity.schedule,
            concurrency: entity.concurrency,
            max_running: entity.max_running,
            execution_info: entity.execution_info,
            scheduler_status: None,
        }))
    }

    pub async fn get_unexpected_error_count(&self, name: &str) -> Option<u64> {
        self.schedulers
            .read()
            .await
            .get(name)
            .map(|scheduler| scheduler.unexpected_error_count())
    }
}
