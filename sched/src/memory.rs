//! Reference implementations of the two repository contracts, backed by
//! `tokio::sync::Mutex`-guarded in-process maps rather than an external
//! datastore. Suitable for this crate's own test suite and for embedders
//! who only need a single process.
//!
//! The datastore contracts assume a document store without a uniqueness
//! constraint on job name, so `JobRepository::define` is specified to
//! dedup pre-existing duplicate rows by most-recent `execution_info`. This
//! in-memory store is keyed by name (`HashMap<String, JobDefinition>`), so
//! duplicates cannot exist in the first place; `define` here only ever sees
//! zero or one existing row under a name. It still goes through
//! `crate::job::merge_duplicate_definitions` for the merge itself — the
//! general multi-row rule degenerates to "preserve the existing row's
//! `execution_info`, overwrite everything else" once there's at most one
//! row to begin with. The multi-row case that rule also has to handle is
//! exercised directly in `job.rs`'s tests against a synthetic list of
//! duplicate rows, since no store shipped in this crate can produce one.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use sched_core::{Id, Result};

use crate::model::{ExecutionInfo, JobDefinition, LastResult, Schedule, ScheduleLiveness};
use crate::repository::{AddExecutionResult, ExecutionsRepository, JobRepository};

#[derive(Default)]
struct ExecutionsState {
    running: HashMap<(Id, String), u32>,
    liveness: HashMap<Id, ScheduleLiveness>,
    active_owner: HashMap<String, Id>,
}

/// In-memory `ExecutionsRepository`. A single internal mutex guards all
/// state so that arbitration (`is_active_schedule` / `set_active_schedule`)
/// can check-then-set atomically.
#[derive(Default)]
pub struct InMemoryExecutionsRepository {
    state: Mutex<ExecutionsState>,
}

impl InMemoryExecutionsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner_is_live(state: &ExecutionsState, owner: Id, stale_after_ms: u64) -> bool {
        match state.liveness.get(&owner) {
            Some(row) => {
                let age_ms = (Utc::now() - row.timestamp).num_milliseconds().max(0) as u64;
                age_ms <= stale_after_ms
            }
            None => false,
        }
    }
}

#[async_trait]
impl ExecutionsRepository for InMemoryExecutionsRepository {
    async fn add_execution(
        &self,
        schedule_id: Id,
        job_name: &str,
        max_running: u32,
    ) -> Result<AddExecutionResult> {
        let mut state = self.state.lock().await;
        let total: u32 = state
            .running
            .iter()
            .filter(|((_, name), _)| name == job_name)
            .map(|(_, count)| *count)
            .sum();

        if max_running > 0 && total >= max_running {
            return Ok(AddExecutionResult {
                added: false,
                running: total,
            });
        }

        let entry = state
            .running
            .entry((schedule_id, job_name.to_string()))
            .or_insert(0);
        *entry += 1;

        Ok(AddExecutionResult {
            added: true,
            running: total + 1,
        })
    }

    async fn remove_execution(&self, schedule_id: Id, job_name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (schedule_id, job_name.to_string());
        if let Some(count) = state.running.get_mut(&key) {
            if *count <= 1 {
                state.running.remove(&key);
            } else {
                *count -= 1;
            }
        }
        Ok(())
    }

    async fn count_running_executions(&self, job_name: &str) -> Result<u32> {
        let state = self.state.lock().await;
        Ok(state
            .running
            .iter()
            .filter(|((_, name), _)| name == job_name)
            .map(|(_, count)| *count)
            .sum())
    }

    async fn remove_job(&self, schedule_id: Id, job_name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running.remove(&(schedule_id, job_name.to_string()));
        Ok(())
    }

    async fn ping(&self, schedule_id: Id) -> Result<()> {
        let mut state = self.state.lock().await;
        let name = state
            .liveness
            .get(&schedule_id)
            .map(|row| row.name.clone())
            .unwrap_or_default();
        state.liveness.insert(
            schedule_id,
            ScheduleLiveness {
                schedule_id,
                name,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    async fn clean(&self, stale_after_ms: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let stale: Vec<Id> = state
            .liveness
            .iter()
            .filter(|(_, row)| {
                let age_ms = (now - row.timestamp).num_milliseconds().max(0) as u64;
                age_ms > stale_after_ms
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            state.liveness.remove(id);
        }
        state.running.retain(|(id, _), _| !stale.contains(id));
        Ok(())
    }

    async fn is_active_schedule(&self, name: &str, schedule_id: Id, stale_after_ms: u64) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(match state.active_owner.get(name) {
            None => true,
            Some(owner) if *owner == schedule_id => true,
            Some(owner) => !Self::owner_is_live(&state, *owner, stale_after_ms),
        })
    }

    async fn set_active_schedule(&self, name: &str, schedule_id: Id, stale_after_ms: u64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let may_claim = match state.active_owner.get(name) {
            None => true,
            Some(owner) if *owner == schedule_id => true,
            Some(owner) => !Self::owner_is_live(&state, *owner, stale_after_ms),
        };
        if may_claim {
            state.active_owner.insert(name.to_string(), schedule_id);

            // Record this instance's liveness under the right name so the
            // next is_active_schedule check (by ourselves or a peer) sees a
            // fresh timestamp rather than "no liveness row at all".
            let entry = state.liveness.entry(schedule_id).or_insert(ScheduleLiveness {
                schedule_id,
                name: name.to_string(),
                timestamp: Utc::now(),
            });
            entry.name = name.to_string();
            entry.timestamp = Utc::now();
        }
        Ok(may_claim)
    }

    async fn delete_one(&self, schedule_id: Id) -> Result<()> {
        let mut state = self.state.lock().await;
        state.liveness.remove(&schedule_id);
        Ok(())
    }
}

/// In-memory `JobRepository`, keyed by job name.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<String, JobDefinition>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_one(&self, name: &str) -> Result<Option<JobDefinition>> {
        Ok(self.jobs.lock().await.get(name).cloned())
    }

    async fn find(&self, names: &[String]) -> Result<Vec<JobDefinition>> {
        let jobs = self.jobs.lock().await;
        if names.is_empty() {
            return Ok(jobs.values().cloned().collect());
        }
        Ok(names
            .iter()
            .filter_map(|name| jobs.get(name).cloned())
            .collect())
    }

    async fn save(&self, entity: JobDefinition) -> Result<()> {
        self.jobs.lock().await.insert(entity.name.clone(), entity);
        Ok(())
    }

    async fn define(&self, entity: JobDefinition) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let existing = jobs.get(&entity.name).cloned().into_iter().collect();
        let merged = crate::job::merge_duplicate_definitions(existing, entity);
        jobs.insert(merged.name.clone(), merged);
        Ok(())
    }

    async fn update_job(
        &self,
        name: &str,
        schedule: Option<Schedule>,
        concurrency: Option<u32>,
        max_running: Option<u32>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| sched_core::Error::NotFound(name.to_string()))?;
        if let Some(schedule) = schedule {
            job.schedule = schedule;
        }
        if let Some(concurrency) = concurrency {
            job.concurrency = concurrency;
        }
        if let Some(max_running) = max_running {
            job.max_running = max_running;
        }
        Ok(())
    }

    async fn check(&self, name: &str) -> Result<Option<ExecutionInfo>> {
        Ok(self
            .jobs
            .lock()
            .await
            .get(name)
            .and_then(|job| job.execution_info.clone()))
    }

    async fn list(&self) -> Result<Vec<JobDefinition>> {
        Ok(self.jobs.lock().await.values().cloned().collect())
    }

    async fn record_started(&self, name: &str, when: DateTime<Utc>) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| sched_core::Error::NotFound(name.to_string()))?;
        job.execution_info
            .get_or_insert_with(ExecutionInfo::default)
            .last_started = Some(when);
        Ok(())
    }

    async fn record_finished(&self, name: &str, when: DateTime<Utc>, result: LastResult) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| sched_core::Error::NotFound(name.to_string()))?;
        let info = job.execution_info.get_or_insert_with(ExecutionInfo::default);
        info.last_finished = Some(when);
        info.last_result = Some(result);
        Ok(())
    }

    async fn delete(&self, names: &[String]) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if names.is_empty() {
            jobs.clear();
        } else {
            for name in names {
                jobs.remove(name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval_job(name: &str) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            schedule: Schedule::Interval {
                interval: "1 second".to_string(),
                first_run_after_ms: 0,
            },
            concurrency: 1,
            max_running: 0,
            execution_info: None,
        }
    }

    #[tokio::test]
    async fn define_preserves_execution_info_on_update() {
        let repo = InMemoryJobRepository::new();
        repo.save(JobDefinition {
            execution_info: Some(ExecutionInfo {
                last_started: Some(Utc::now()),
                last_finished: Some(Utc::now()),
                last_result: None,
            }),
            ..interval_job("j")
        })
        .await
        .unwrap();

        repo.define(JobDefinition {
            concurrency: 5,
            ..interval_job("j")
        })
        .await
        .unwrap();

        let stored = repo.find_one("j").await.unwrap().unwrap();
        assert_eq!(stored.concurrency, 5);
        assert!(stored.execution_info.is_some());
    }

    #[tokio::test]
    async fn update_job_preserves_execution_info() {
        let repo = InMemoryJobRepository::new();
        repo.save(JobDefinition {
            execution_info: Some(ExecutionInfo {
                last_started: Some(Utc::now()),
                last_finished: None,
                last_result: None,
            }),
            ..interval_job("j")
        })
        .await
        .unwrap();

        repo.update_job("j", None, None, Some(0)).await.unwrap();

        let stored = repo.find_one("j").await.unwrap().unwrap();
        assert_eq!(stored.max_running, 0);
        assert!(stored.execution_info.is_some());
    }

    #[tokio::test]
    async fn add_execution_respects_max_running() {
        let repo = InMemoryExecutionsRepository::new();
        let a = Id::new();
        let b = Id::new();

        let r1 = repo.add_execution(a, "j", 2).await.unwrap();
        assert!(r1.added);
        let r2 = repo.add_execution(b, "j", 2).await.unwrap();
        assert!(r2.added);
        let r3 = repo.add_execution(a, "j", 2).await.unwrap();
        assert!(!r3.added);
        assert_eq!(repo.count_running_executions("j").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn remove_execution_floors_at_zero() {
        let repo = InMemoryExecutionsRepository::new();
        let id = Id::new();
        repo.remove_execution(id, "j").await.unwrap();
        assert_eq!(repo.count_running_executions("j").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn set_active_schedule_is_exclusive() {
        let repo = InMemoryExecutionsRepository::new();
        let a = Id::new();
        let b = Id::new();

        assert!(repo.is_active_schedule("s", a, 1000).await.unwrap());
        assert!(repo.set_active_schedule("s", a, 1000).await.unwrap());
        assert!(!repo.is_active_schedule("s", b, 1000).await.unwrap());
        assert!(!repo.set_active_schedule("s", b, 1000).await.unwrap());
        // The owner can always re-claim its own row.
        assert!(repo.set_active_schedule("s", a, 1000).await.unwrap());
    }

    #[tokio::test]
    async fn clean_removes_stale_liveness_and_executions() {
        let repo = InMemoryExecutionsRepository::new();
        let id = Id::new();
        repo.add_execution(id, "j", 0).await.unwrap();
        {
            let mut state = repo.state.lock().await;
            state.liveness.insert(
                id,
                ScheduleLiveness {
                    schedule_id: id,
                    name: "s".to_string(),
                    timestamp: Utc::now() - chrono::Duration::milliseconds(10_000),
                },
            );
        }
        repo.clean(1000).await.unwrap();
        assert_eq!(repo.count_running_executions("j").await.unwrap(), 0);
    }
}
