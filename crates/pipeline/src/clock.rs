//! Injectable time source.

use std::sync::{Arc, Mutex};

use time::{Date, Duration, OffsetDateTime, UtcOffset};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;

    /// Current calendar day in UTC.
    fn today(&self) -> Date {
        self.now().to_offset(UtcOffset::UTC).date()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(at: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(at)),
        }
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn manual_clock_advances_and_shares_state() {
        let clock = ManualClock::new(datetime!(2024-01-01 23:59:30 UTC));
        let other = clock.clone();
        clock.advance(Duration::seconds(45));
        assert_eq!(other.now(), datetime!(2024-01-02 00:00:15 UTC));
        assert_eq!(other.today(), date!(2024 - 01 - 02));
    }

    #[test]
    fn today_is_evaluated_in_utc() {
        let clock = ManualClock::new(datetime!(2024-01-02 01:00 +08:00));
        assert_eq!(clock.today(), date!(2024 - 01 - 01));
    }
}
