//! When the background loop may start a pass

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::common::{add_duration, truncate};

/// Allows one pass per `interval`, no earlier than `delay` after the
/// interval's start.
#[derive(Debug, Clone)]
pub struct IntervalSchedule {
    interval: Duration,
    delay: Duration,
    last_handled: Option<DateTime<Utc>>,
}

impl IntervalSchedule {
    pub fn new(interval: Duration, delay: Duration) -> Self {
        Self {
            interval,
            delay,
            last_handled: None,
        }
    }

    /// Returns true at most once per interval, marking that interval handled.
    pub fn should_run(&mut self, now: DateTime<Utc>) -> bool {
        let interval_start = truncate(now, self.interval);
        let target = add_duration(interval_start, self.delay);
        if now < target {
            return false;
        }
        if self.last_handled == Some(interval_start) {
            return false;
        }
        self.last_handled = Some(interval_start);
        true
    }

    pub fn last_handled(&self) -> Option<DateTime<Utc>> {
        self.last_handled
    }
}
