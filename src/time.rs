//! Clock abstraction.
//!
//! Every timestamp recorded by the engine (apply times, event times) comes from
//! a [`Clock`] so tests can pin time.

use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as `YYYY-MM-DDTHH:MM:SS.mmmZ`, independent of locale.
    fn now_iso_string(&self) -> String {
        format_iso_millis(self.now())
    }
}

/// Renders a timestamp with millisecond precision and a `Z` suffix.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use confidence::time::format_iso_millis;
///
/// let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
/// assert_eq!(format_iso_millis(t), "2024-01-02T03:04:05.000Z");
/// ```
#[must_use]
pub fn format_iso_millis(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock stopped at `at`.
    #[must_use]
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Moves the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = at;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_iso_string_is_millisecond_utc() {
        let t = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap() + Duration::microseconds(123_456);
        assert_eq!(format_iso_millis(t), "2023-12-31T23:59:59.123Z");
    }

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now_iso_string(), "2024-06-01T00:01:30.000Z");
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_system_clock_format_shape() {
        let s = SystemClock.now_iso_string();
        assert!(s.ends_with('Z'));
        assert_eq!(s.len(), "2024-01-01T00:00:00.000Z".len());
    }
}
