//! Host-tunable settings for the scheduler's ambient concerns: how often an
//! instance announces itself to its peers, how stale a peer's heartbeat has
//! to be before it is presumed dead, and the logical schedule name a
//! cluster of instances coordinates under.
//!
//! Everything else about a job (its interval, its cron expression, its
//! concurrency) is configured per-job through the job-definition builder,
//! not through this struct.
use config::{Config as ConfigBuilder, Environment};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};

/// Top-level scheduler settings, loadable from environment variables.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Logical name instances with the same value coordinate leadership
    /// under. Independent deployments must use distinct names.
    #[validate(length(min = 1))]
    pub schedule_name: String,

    /// How often this instance refreshes its liveness row, in milliseconds.
    #[validate(range(min = 10))]
    pub ping_interval_ms: u64,

    /// A peer is considered dead once its liveness timestamp is older than
    /// `default_lease_multiplier * ping_interval_ms`.
    #[validate(range(min = 1))]
    pub default_lease_multiplier: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            schedule_name: "default".to_string(),
            ping_interval_ms: 10_000,
            default_lease_multiplier: 2,
        }
    }
}

impl SchedulerSettings {
    /// Load settings from defaults, then `SCHED_`-prefixed environment
    /// variables, then validate the result.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let builder = ConfigBuilder::builder()
            .set_default("schedule_name", defaults.schedule_name)?
            .set_default("ping_interval_ms", defaults.ping_interval_ms)?
            .set_default("default_lease_multiplier", defaults.default_lease_multiplier)?
            .add_source(
                Environment::with_prefix("SCHED")
                    .try_parsing(true)
                    .separator("_"),
            );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build config: {e}")))?;

        let parsed: SchedulerSettings = config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("failed to deserialize config: {e}")))?;

        parsed
            .validate()
            .map_err(|e| Error::Validation(e.to_string()))?;

        Ok(parsed)
    }

    /// Milliseconds after which a peer's liveness row is considered stale.
    pub fn stale_after_ms(&self) -> u64 {
        self.ping_interval_ms * self.default_lease_multiplier as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = SchedulerSettings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn stale_after_is_multiplier_times_interval() {
        let settings = SchedulerSettings {
            schedule_name: "s".to_string(),
            ping_interval_ms: 1000,
            default_lease_multiplier: 2,
        };
        assert_eq!(settings.stale_after_ms(), 2000);
    }

    #[test]
    fn empty_schedule_name_is_invalid() {
        let settings = SchedulerSettings {
            schedule_name: String::new(),
            ..SchedulerSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_picks_up_defaults_without_env() {
        let settings = SchedulerSettings::load().expect("defaults must validate");
        assert_eq!(settings.schedule_name, "default");
    }
}
