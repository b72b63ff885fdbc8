//! Foundation crate: error types, identifiers, timestamps, tracing setup,
//! and host-tunable settings shared by the scheduler crate and its tests.

pub mod error;
pub mod id;
pub mod settings;
pub mod telemetry;
pub mod time;

pub use error::{Error, Result};
pub use id::Id;
pub use settings::SchedulerSettings;
pub use time::{to_rfc3339, utc_now, MonotonicTimer};

#[cfg(test)]
mod tests {
    use test_support::create_test_id;

    #[test]
    fn cross_crate_usage() {
        let test_id = create_test_id();
        assert_eq!(test_id, "test-id-123");
    }
}
