use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::time::Timer;

/// The persisted state of one in-flight countdown
///
/// Serialized as JSON:
///
/// ```json
/// {"startTime":1711562400000,"duration":90,"type":"set-rest","isRunning":true,"savedAt":1711562405000}
/// ```
///
/// `startTime` and `savedAt` are Unix timestamps in milliseconds and
/// `duration` is a whole count of seconds. The key a record is stored under
/// is not part of the record.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerRecord {
    #[serde(flatten)]
    timer: Timer,
    #[serde(rename = "type")]
    category: String,
    is_running: bool,
    #[serde(with = "crate::time::millis")]
    saved_at: SystemTime,
}

impl TimerRecord {
    /// A record for a timer that is currently counting down
    pub fn running(timer: Timer, category: &str, saved_at: SystemTime) -> Self {
        Self {
            timer,
            category: category.to_string(),
            is_running: true,
            saved_at,
        }
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn saved_at(&self) -> SystemTime {
        self.saved_at
    }

    /// Mark the record as inert; recovery ignores it
    pub fn set_running(&mut self, is_running: bool) {
        self.is_running = is_running;
    }

    /// Check if this record was last written more than `max_age` before `now`
    pub fn is_stale(&self, now: SystemTime, max_age: Duration) -> bool {
        now.duration_since(self.saved_at)
            .map(|age| age > max_age)
            .unwrap_or(false)
    }
}
