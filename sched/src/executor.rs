//! `JobExecutor`: runs one attempt of a job handler under the global
//! concurrency cap, recording start/finish bookkeeping around it.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use sched_core::{Id, Result};

use crate::model::{ExecutionStatus, JobResult, LastResult};
use crate::repository::{ExecutionsRepository, JobRepository};

/// A user-supplied job body. `execute` returns the value to record as
/// `handler_result` on success, or an error message to record as `error` on
/// failure — mirrored in `JobResult`/`LastResult`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self) -> std::result::Result<Option<serde_json::Value>, String>;
}

/// Runs attempts of one job on behalf of one `SchedulePing` instance.
pub struct JobExecutor {
    schedule_id: Id,
    executions: Arc<dyn ExecutionsRepository>,
    jobs: Arc<dyn JobRepository>,
    stopped: Arc<AtomicBool>,
}

impl JobExecutor {
    pub fn new(
        schedule_id: Id,
        executions: Arc<dyn ExecutionsRepository>,
        jobs: Arc<dyn JobRepository>,
    ) -> Self {
        Self {
            schedule_id,
            executions,
            jobs,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal that no further attempts should run. Checked at the top of
    /// `execute`, before any running record is claimed.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Clear the stop signal so a fresh `JobScheduler::start` can reuse this
    /// executor.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub async fn execute(&self, job_name: &str, handler: &dyn JobHandler) -> Result<JobResult> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(JobResult::stopped());
        }

        let Some(job) = self.jobs.find_one(job_name).await? else {
            return Ok(JobResult::not_found());
        };

        let admission = self
            .executions
            .add_execution(self.schedule_id, job_name, job.max_running)
            .await?;
        if !admission.added {
            return Ok(JobResult::max_running_reached());
        }

        // From here on the running record must be released no matter how
        // the attempt itself turns out, so the cleanup runs unconditionally
        // rather than behind `?` on the attempt's own result.
        let outcome = self.run_attempt(job_name, handler).await;

        if let Err(err) = self.executions.remove_execution(self.schedule_id, job_name).await {
            tracing::error!(job = job_name, error = %err, "internalError: failed to release running record");
        }

        outcome
    }

    async fn run_attempt(&self, job_name: &str, handler: &dyn JobHandler) -> Result<JobResult> {
        let started_at = sched_core::utc_now();
        self.jobs.record_started(job_name, started_at).await?;

        let outcome = handler.execute().await;

        let finished_at = sched_core::utc_now();
        match outcome {
            Ok(handler_result) => {
                self.jobs
                    .record_finished(
                        job_name,
                        finished_at,
                        LastResult {
                            status: ExecutionStatus::Finished,
                            handler_result: handler_result.clone(),
                            error: None,
                        },
                    )
                    .await?;
                Ok(JobResult::finished(handler_result))
            }
            Err(error) => {
                self.jobs
                    .record_finished(
                        job_name,
                        finished_at,
                        LastResult {
                            status: ExecutionStatus::Failed,
                            handler_result: None,
                            error: Some(error.clone()),
                        },
                    )
                    .await?;
                Ok(JobResult::failed(error))
            }
        }
    }
}
