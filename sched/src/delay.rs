//! Computes the delay, in milliseconds, before a job's next fire.
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use sched_core::{Error, Result};

pub struct DelayCalculator;

impl DelayCalculator {
    /// Delay before the next interval fire. `last_started_at` is the job's
    /// `execution_info.last_started`, if any; when absent, `first_run_after_ms`
    /// governs the very first fire.
    pub fn delay_from_interval(
        interval_ms: u64,
        last_started_at: Option<DateTime<Utc>>,
        first_run_after_ms: u64,
    ) -> u64 {
        let Some(last_started_at) = last_started_at else {
            return first_run_after_ms;
        };

        let next_fire = last_started_at + chrono::Duration::milliseconds(interval_ms as i64);
        let now = Utc::now();
        if next_fire <= now {
            0
        } else {
            (next_fire - now).num_milliseconds().max(0) as u64
        }
    }

    /// Delay, in milliseconds, until `cron_expression`'s next fire instant.
    pub fn delay_from_cron(cron_expression: &str) -> Result<u64> {
        let schedule = CronSchedule::from_str(cron_expression)
            .map_err(|e| Error::Scheduling(format!("invalid cron expression: {e}")))?;

        let now = Utc::now();
        let next = schedule
            .after(&now)
            .next()
            .ok_or_else(|| Error::Scheduling("cron schedule has no future fire time".to_string()))?;

        Ok((next - now).num_milliseconds().max(0) as u64)
    }

    /// Parse a human-readable duration ("1 second", "5 minutes") to
    /// milliseconds. Must resolve to a positive, finite duration.
    pub fn parse_interval_ms(interval: &str) -> Result<u64> {
        let duration = humantime::parse_duration(interval)
            .map_err(|e| Error::Scheduling(format!("invalid interval '{interval}': {e}")))?;
        let ms = duration.as_millis();
        if ms == 0 || ms > u64::MAX as u128 {
            return Err(Error::Scheduling(format!(
                "interval '{interval}' must resolve to a positive duration"
            )));
        }
        Ok(ms as u64)
    }
}
