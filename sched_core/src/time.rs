//! Timestamp helpers. The scheduler's data model stores `DateTime<Utc>`
//! throughout (job `executionInfo`, execution records, liveness rows), so
//! unlike the foundation crate this was lifted from, these helpers are
//! `chrono`-based rather than `std::time::SystemTime`-based.
use chrono::{DateTime, Utc};
use std::time::Instant;

/// The current instant, UTC.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp as RFC3339, the wire format used by every repository
/// contract in this crate.
pub fn to_rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

/// A monotonic duration measurer, used by tests asserting on tick timing.
pub struct MonotonicTimer {
    start: Instant,
}

impl MonotonicTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn to_rfc3339_roundtrips_through_parse() {
        let now = utc_now();
        let formatted = to_rfc3339(now);
        let parsed = DateTime::parse_from_rfc3339(&formatted).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn monotonic_timer_advances() {
        let timer = MonotonicTimer::new();
        thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn monotonic_timer_reset() {
        let mut timer = MonotonicTimer::new();
        thread::sleep(Duration::from_millis(5));
        let first = timer.elapsed();
        timer.reset();
        assert!(timer.elapsed() < first);
    }
}
