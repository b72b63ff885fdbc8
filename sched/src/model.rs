//! The persisted job definition and the execution/result types threaded
//! through the executor, the scheduler, and the repository contracts.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sched_core::Id;

/// Exactly one of these is set on a job. Modeled as a tagged enum rather
/// than subclassing so that `JobScheduler::start` can match on it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Schedule {
    Interval {
        /// Human-readable duration, e.g. `"1 second"`, `"5 minutes"`.
        interval: String,
        /// Delay before the very first fire when no prior run is on record.
        first_run_after_ms: u64,
    },
    Cron {
        /// A `cron`-crate-compatible six-field expression.
        cron_schedule: String,
    },
}

/// Outcome of a single handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Finished,
    Failed,
    MaxRunningReached,
    NotFound,
    Stopped,
}

/// The last recorded outcome of a job, written only by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastResult {
    pub status: ExecutionStatus,
    pub handler_result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Execution bookkeeping for a job. Only `JobExecutor` writes this;
/// `JobRepository::update_job` must leave it untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    pub last_started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_result: Option<LastResult>,
}

/// A job definition as stored by `JobRepository`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    pub name: String,
    pub schedule: Schedule,
    pub concurrency: u32,
    pub max_running: u32,
    pub execution_info: Option<ExecutionInfo>,
}

impl JobDefinition {
    /// `numToExecute` for one tick given the current globally-running count.
    /// `max_running == 0` means unlimited: always launch `concurrency`.
    pub fn num_to_execute(&self, running: u32) -> u32 {
        if self.max_running == 0 {
            self.concurrency
        } else {
            self.concurrency.min(self.max_running.saturating_sub(running))
        }
    }
}

/// The outcome of one `JobExecutor::execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub status: ExecutionStatus,
    pub handler_result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobResult {
    pub fn finished(handler_result: Option<serde_json::Value>) -> Self {
        Self {
            status: ExecutionStatus::Finished,
            handler_result,
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            handler_result: None,
            error: Some(error),
        }
    }

    pub fn max_running_reached() -> Self {
        Self {
            status: ExecutionStatus::MaxRunningReached,
            handler_result: None,
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: ExecutionStatus::NotFound,
            handler_result: None,
            error: None,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: ExecutionStatus::Stopped,
            handler_result: None,
            error: None,
        }
    }
}

/// Description returned by `JobScheduler::job_description`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescription {
    pub name: String,
    pub schedule: Schedule,
    pub concurrency: u32,
    pub max_running: u32,
    pub execution_info: Option<ExecutionInfo>,
    /// Present only while the scheduler for this job is started.
    pub scheduler_status: Option<SchedulerStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub schedule: Schedule,
    pub running: u32,
}

/// The liveness record published by one `SchedulePing` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleLiveness {
    pub schedule_id: Id,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}
