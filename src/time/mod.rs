#[doc(hidden)]
pub mod duration;
#[doc(hidden)]
pub mod millis;

use std::{
    cell::Cell,
    fmt::Debug,
    rc::Rc,
    time::{Duration, SystemTime},
};

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Like a kitchen timer, anchored to the wall clock
///
/// Progress is always derived from `started_at`, so a timer that was not
/// observed for a while reports the correct value the next time it is asked.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Timer {
    #[serde(rename = "startTime", with = "crate::time::millis")]
    started_at: SystemTime,
    #[serde(with = "crate::time::duration::seconds")]
    duration: Duration,
}

impl Timer {
    /// Create a new timer
    pub fn new(started_at: SystemTime, duration: Duration) -> Self {
        Self {
            started_at,
            duration,
        }
    }

    /// Get the time this timer starts at
    pub fn starts_at(&self) -> SystemTime {
        self.started_at
    }

    /// Get the time this timer ends at, if that instant can be represented
    pub fn ends_at(&self) -> Option<SystemTime> {
        self.started_at.checked_add(self.duration)
    }

    /// Get the length of time that this timer was set for
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whole seconds passed since this timer started, never more than its duration
    pub fn elapsed_secs(&self, now: SystemTime) -> u64 {
        now.duration_since(self.started_at)
            .unwrap_or(Duration::ZERO)
            .as_secs()
            .min(self.duration.as_secs())
    }

    /// Whole seconds left before this timer expires
    pub fn remaining_secs(&self, now: SystemTime) -> u64 {
        self.duration.as_secs() - self.elapsed_secs(now)
    }

    /// Check if this timer's duration has run out
    pub fn done(&self, now: SystemTime) -> bool {
        self.remaining_secs(now) == 0
    }
}

/// Source of wall-clock time
pub trait Clock: Debug {
    fn now(&self) -> SystemTime;
}

/// The real system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same instant, so a test can hold one handle while the
/// engine under test holds another.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<SystemTime>>,
}

impl ManualClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Rc::new(Cell::new(now)),
        }
    }

    /// A clock starting at the given Unix timestamp in milliseconds
    pub fn at_millis(ms: u64) -> Self {
        Self::new(SystemTime::UNIX_EPOCH + Duration::from_millis(ms))
    }

    pub fn set(&self, now: SystemTime) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.now.get()
    }
}

/// Extensions to `Duration`
pub trait DurationExt
where
    Self: Sized,
{
    /// Parse a duration like "1h30m", "90s", "5m", or a bare count of seconds
    fn from_human(s: &str) -> Result<Self>;

    /// Formats the duration as a "kitchen timer" string, e.g. mm:ss.
    ///
    /// If the duration is an hour or longer, it is formatted as hh:mm:ss.
    fn to_kitchen(&self) -> String;

    /// Formats the duration in a humanized way, for example 22m30s.
    fn to_human(&self) -> String;
}

impl DurationExt for Duration {
    fn from_human(s: &str) -> Result<Self> {
        let re = Regex::new(r"^(?:([0-9]+)h)?(?:([0-9]+)m)?(?:([0-9]+)s?)?$")?;
        let caps = re
            .captures(s.trim())
            .with_context(|| format!("\"{}\" is not a duration, try something like 1h30m or 90s", s))?;

        let mut seconds: u64 = 0;
        let mut matched = false;

        for (index, scale) in [(1, 3600), (2, 60), (3, 1)] {
            if let Some(cap) = caps.get(index) {
                let n: u64 = cap
                    .as_str()
                    .parse()
                    .with_context(|| format!("{} is not an integer", cap.as_str()))?;
                seconds = n
                    .checked_mul(scale)
                    .and_then(|part| seconds.checked_add(part))
                    .with_context(|| format!("\"{}\" is too long", s))?;
                matched = true;
            }
        }

        if !matched {
            bail!("Duration string is empty");
        }

        Ok(Duration::from_secs(seconds))
    }

    fn to_kitchen(&self) -> String {
        let total = self.as_secs();
        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }

    fn to_human(&self) -> String {
        use std::fmt::Write;

        let total = self.as_secs();

        if total == 0 {
            return "0s".to_string();
        }

        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;

        let mut acc = String::new();

        if hours > 0 {
            let _ = write!(acc, "{}h", hours);
        }

        if minutes > 0 {
            let _ = write!(acc, "{}m", minutes);
        }

        if seconds > 0 {
            let _ = write!(acc, "{}s", seconds);
        }

        acc
    }
}
