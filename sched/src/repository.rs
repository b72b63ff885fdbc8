//! The two datastore contracts this crate depends on. The persistent
//! datastore itself is out of scope; hosts supply an implementation (or use
//! the in-memory reference implementation in [`crate::memory`]).
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sched_core::{Id, Result};

use crate::model::{JobDefinition, LastResult};

/// Result of an attempted admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddExecutionResult {
    pub added: bool,
    pub running: u32,
}

/// Tracks live scheduler instances and in-flight executions. Every mutation
/// must be safe to call concurrently from multiple instances sharing the
/// same backing store.
#[async_trait]
pub trait ExecutionsRepository: Send + Sync {
    /// Atomically increment the running count for `(schedule_id, job_name)`
    /// unless doing so would exceed `max_running` (0 = unlimited).
    async fn add_execution(
        &self,
        schedule_id: Id,
        job_name: &str,
        max_running: u32,
    ) -> Result<AddExecutionResult>;

    /// Decrement the running count for `(schedule_id, job_name)`, floored at
    /// zero.
    async fn remove_execution(&self, schedule_id: Id, job_name: &str) -> Result<()>;

    /// Sum of running executions for `job_name` across all schedule ids.
    async fn count_running_executions(&self, job_name: &str) -> Result<u32>;

    /// Delete all running records for `(schedule_id, job_name)`.
    async fn remove_job(&self, schedule_id: Id, job_name: &str) -> Result<()>;

    /// Upsert this instance's liveness row with the current timestamp.
    async fn ping(&self, schedule_id: Id) -> Result<()>;

    /// Delete liveness rows (and the execution rows they own) that have
    /// gone stale, i.e. not pinged within `stale_after_ms`.
    async fn clean(&self, stale_after_ms: u64) -> Result<()>;

    /// True iff no other live instance holds the active row for `name`, or
    /// the active row already belongs to `schedule_id`.
    async fn is_active_schedule(&self, name: &str, schedule_id: Id, stale_after_ms: u64) -> Result<bool>;

    /// Conditionally claim the active row for `name`. Returns whether the
    /// claim succeeded.
    async fn set_active_schedule(&self, name: &str, schedule_id: Id, stale_after_ms: u64) -> Result<bool>;

    /// Remove this instance's liveness row.
    async fn delete_one(&self, schedule_id: Id) -> Result<()>;
}

/// Stores job definitions and their last-execution info.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find_one(&self, name: &str) -> Result<Option<JobDefinition>>;

    /// All jobs whose name is in `names`, or all jobs when `names` is empty.
    async fn find(&self, names: &[String]) -> Result<Vec<JobDefinition>>;

    /// Persist `entity` verbatim, overwriting any existing row with the same
    /// name.
    async fn save(&self, entity: JobDefinition) -> Result<()>;

    /// Upsert a newly validated job definition, preserving `execution_info`
    /// from the most-recently-finished existing row and deleting any other
    /// duplicates by name — see [`crate::job::merge_duplicate_definitions`]
    /// for the merge rule itself. A store with a uniqueness constraint on
    /// `name` (like [`crate::memory::InMemoryJobRepository`]) can never hold
    /// a duplicate, so this degenerates to preserving the single existing
    /// row's `execution_info`.
    async fn define(&self, entity: JobDefinition) -> Result<()>;

    /// Merge `schedule`/`concurrency`/`max_running` into the stored row
    /// without touching `execution_info`. Must allow `max_running = 0`.
    async fn update_job(
        &self,
        name: &str,
        schedule: Option<crate::model::Schedule>,
        concurrency: Option<u32>,
        max_running: Option<u32>,
    ) -> Result<()>;

    async fn check(&self, name: &str) -> Result<Option<crate::model::ExecutionInfo>>;

    async fn list(&self) -> Result<Vec<JobDefinition>>;

    /// Record the start of an attempt. Only `JobExecutor` calls this.
    async fn record_started(&self, name: &str, when: DateTime<Utc>) -> Result<()>;

    /// Record the end of an attempt. Only `JobExecutor` calls this.
    async fn record_finished(&self, name: &str, when: DateTime<Utc>, result: LastResult) -> Result<()>;

    /// Delete jobs by name, or all jobs when `names` is empty.
    async fn delete(&self, names: &[String]) -> Result<()>;
}
