//! Signals that the host lost or regained control, and the periodic tick source

use std::time::{Duration, SystemTime};

use log::debug;

/// What the host reports about its own execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The host is about to stop running our code for a while
    Suspended,
    /// The host is running our code again after a suspension
    Resumed,
}

/// What a [`Ticker`] saw when it woke up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Beat {
    /// One ordinary period went by
    Tick,
    /// Far more than one period went by; the process was stopped or the machine slept
    Resumed { gap: Duration },
}

/// Fixed-period tick source for a blocking, single-threaded driver loop
///
/// A plain loop cannot be told that it was suspended, so the ticker infers
/// it: when the wall-clock gap between two beats is much longer than the
/// period, it reports [`Beat::Resumed`] instead of [`Beat::Tick`].
#[derive(Clone, Debug)]
pub struct Ticker {
    period: Duration,
    suspend_threshold: Duration,
    last: Option<SystemTime>,
}

impl Ticker {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

    pub fn new(period: Duration) -> Self {
        Self {
            period,
            suspend_threshold: period * 3,
            last: None,
        }
    }

    /// Gap between beats above which the host is assumed to have been suspended
    pub fn with_suspend_threshold(mut self, threshold: Duration) -> Self {
        self.suspend_threshold = threshold;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep for one period and report what happened meanwhile
    pub fn wait(&mut self) -> Beat {
        if self.last.is_none() {
            self.last = Some(SystemTime::now());
        }

        std::thread::sleep(self.period);
        self.observe(SystemTime::now())
    }

    /// Classify a beat observed at `now`
    pub fn observe(&mut self, now: SystemTime) -> Beat {
        let gap = self
            .last
            .and_then(|last| now.duration_since(last).ok())
            .unwrap_or(Duration::ZERO);

        self.last = Some(now);

        if gap > self.suspend_threshold {
            debug!("Woke up {}ms late, treating it as a resume", gap.as_millis());
            Beat::Resumed { gap }
        } else {
            Beat::Tick
        }
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERIOD)
    }
}
