//! Input validation for job definitions (C8). A `JobBuilder` is the only
//! supported way to produce a [`JobDefinition`] from user input; the
//! interval/cron exclusivity the distilled contract calls for falls out of
//! [`Schedule`] being a tagged enum rather than needing its own check.
use std::str::FromStr;

use cron::Schedule as CronSchedule;

use sched_core::{Error, Result};

use crate::delay::DelayCalculator;
use crate::model::{JobDefinition, Schedule};

/// §4.6's `define` dedup rule, factored out as a pure function over
/// whatever rows a store currently holds under the incoming job's name. A
/// document store without a uniqueness constraint may have accumulated more
/// than one row for `name` (legacy data); the survivor's `execution_info` is
/// whichever `existing` row has the most recent `last_finished`, carried
/// onto `incoming`'s freshly-validated schedule/concurrency fields. The
/// caller is responsible for persisting only the returned row and deleting
/// every row `existing` named. An empty `existing` degenerates to `incoming`
/// unchanged — the ordinary first-time `define` case.
pub fn merge_duplicate_definitions(existing: Vec<JobDefinition>, mut incoming: JobDefinition) -> JobDefinition {
    let survivor_execution_info = existing
        .into_iter()
        .max_by_key(|job| job.execution_info.as_ref().and_then(|info| info.last_finished))
        .and_then(|job| job.execution_info);

    incoming.execution_info = survivor_execution_info;
    incoming
}

pub struct JobBuilder {
    name: String,
    schedule: Schedule,
    concurrency: u32,
    max_running: u32,
}

impl JobBuilder {
    pub fn interval(name: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: Schedule::Interval {
                interval: interval.into(),
                first_run_after_ms: 0,
            },
            concurrency: 1,
            max_running: 0,
        }
    }

    pub fn cron(name: impl Into<String>, cron_schedule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: Schedule::Cron {
                cron_schedule: cron_schedule.into(),
            },
            concurrency: 1,
            max_running: 0,
        }
    }

    /// Only meaningful on an interval schedule; ignored on a cron schedule.
    pub fn first_run_after_ms(mut self, ms: u64) -> Self {
        if let Schedule::Interval {
            first_run_after_ms, ..
        } = &mut self.schedule
        {
            *first_run_after_ms = ms;
        }
        self
    }

    pub fn concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn max_running(mut self, max_running: u32) -> Self {
        self.max_running = max_running;
        self
    }

    /// Validate and build the stored job shape. `name` must be non-empty;
    /// the interval string or cron expression must parse; `concurrency`
    /// normalizes to at least 1. A `concurrency` above a nonzero
    /// `max_running` is accepted with a warning rather than rejected.
    pub fn build(self) -> Result<JobDefinition> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("job name must not be empty".to_string()));
        }

        match &self.schedule {
            Schedule::Interval { interval, .. } => {
                DelayCalculator::parse_interval_ms(interval)?;
            }
            Schedule::Cron { cron_schedule } => {
                CronSchedule::from_str(cron_schedule)
                    .map_err(|e| Error::Scheduling(format!("invalid cron expression: {e}")))?;
            }
        }

        let concurrency = self.concurrency.max(1);
        let max_running = self.max_running;

        if max_running > 0 && concurrency > max_running {
            tracing::warn!(
                job = %name,
                concurrency,
                max_running,
                "concurrency exceeds maxRunning; accepting anyway"
            );
        }

        Ok(JobDefinition {
            name,
            schedule: self.schedule,
            concurrency,
            max_running,
            execution_info: None,
        })
    }
}
