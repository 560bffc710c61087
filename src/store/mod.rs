//! Best-effort persistence of in-flight timers
//!
//! Every running countdown rewrites its [`TimerRecord`] on each tick. When
//! the program starts again after being killed or restarted,
//! [`TimerRecordStore::scan_all`] finds the timers that were still counting
//! and reports how far along they are now.
//!
//! Nothing here fails loudly. A store that cannot be read or written only
//! means timers cannot be recovered after a restart; they keep counting in
//! memory regardless.

pub mod storage;

use std::{fmt::Debug, rc::Rc, time::Duration};

use anyhow::{bail, Context, Result};
use log::{debug, warn};

use crate::{record::TimerRecord, time::Clock};

pub use storage::{FileStorage, MemoryStorage, Storage};

/// Records older than this are garbage, never resumed
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// A timer found in the store that still has time left
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveredTimer {
    pub key: String,
    pub record: TimerRecord,
    pub remaining: u64,
    pub elapsed: u64,
}

/// Durable slots for timer records, one per persistence key
pub trait TimerRecordStore: Debug {
    /// Store `record` under `key`, replacing whatever was there
    fn write(&self, key: &str, record: &TimerRecord);

    /// Get the record under `key`, if there is a readable one
    fn read(&self, key: &str) -> Option<TimerRecord>;

    /// Delete the record under `key`, if any
    fn remove(&self, key: &str);

    /// Find every running timer that still has time left, in key order
    ///
    /// Unreadable, stale, stopped, and expired records are deleted along the way.
    fn scan_all(&self) -> Vec<RecoveredTimer>;
}

/// A [`TimerRecordStore`] over any [`Storage`] table
///
/// Keys are namespaced inside the table so the scan can tell timer records
/// apart from everything else stored there.
#[derive(Debug)]
pub struct RecoveryStore<S: Storage> {
    storage: S,
    clock: Rc<dyn Clock>,
    max_age: Duration,
}

impl<S: Storage> RecoveryStore<S> {
    const NAMESPACE: &'static str = "restclock.timer.";

    pub fn new(storage: S, clock: Rc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Override how old a record may get before it is discarded
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Whether a record is stored under `key`, readable or not
    ///
    /// Unlike [`TimerRecordStore::read`] this tells a missing record apart
    /// from a table that cannot be reached.
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.storage.get(&Self::slot(key))?.is_some())
    }

    fn slot(key: &str) -> String {
        format!("{}{}", Self::NAMESPACE, key)
    }

    fn decode(raw: &str) -> Result<TimerRecord> {
        let record: TimerRecord =
            serde_json::from_str(raw).with_context(|| "Failed to parse timer record")?;

        if record.timer().duration().is_zero() {
            bail!("Timer record has a zero duration");
        }

        Ok(record)
    }

    fn discard(&self, slot: &str) {
        if let Err(e) = self.storage.remove(slot) {
            warn!("Unable to delete timer record {}: {:#}", slot, e);
        }
    }
}

impl<S: Storage> TimerRecordStore for RecoveryStore<S> {
    fn write(&self, key: &str, record: &TimerRecord) {
        let result = serde_json::to_string(record)
            .with_context(|| "Unable to format timer record as JSON")
            .and_then(|json| self.storage.set(&Self::slot(key), &json));

        if let Err(e) = result {
            warn!("Unable to persist timer {}: {:#}", key, e);
        }
    }

    fn read(&self, key: &str) -> Option<TimerRecord> {
        let slot = Self::slot(key);

        let raw = match self.storage.get(&slot) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Unable to read timer {}: {:#}", key, e);
                return None;
            }
        };

        match Self::decode(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Discarding corrupted timer record {}: {:#}", key, e);
                self.discard(&slot);
                None
            }
        }
    }

    fn remove(&self, key: &str) {
        self.discard(&Self::slot(key));
    }

    fn scan_all(&self) -> Vec<RecoveredTimer> {
        let now = self.clock.now();

        let mut slots = match self.storage.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Unable to scan for timers to recover: {:#}", e);
                return Vec::new();
            }
        };
        slots.sort();

        let mut recovered = Vec::new();

        for slot in slots {
            let Some(key) = slot.strip_prefix(Self::NAMESPACE) else {
                continue;
            };

            let raw = match self.storage.get(&slot) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Unable to read timer {}: {:#}", key, e);
                    continue;
                }
            };

            let record = match Self::decode(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Discarding corrupted timer record {}: {:#}", key, e);
                    self.discard(&slot);
                    continue;
                }
            };

            if record.is_stale(now, self.max_age) {
                debug!("Discarding stale timer {}", key);
                self.discard(&slot);
                continue;
            }

            if !record.is_running() {
                debug!("Discarding stopped timer {}", key);
                self.discard(&slot);
                continue;
            }

            let remaining = record.timer().remaining_secs(now);

            if remaining == 0 {
                debug!("Timer {} expired while nothing was watching it", key);
                self.discard(&slot);
                continue;
            }

            recovered.push(RecoveredTimer {
                key: key.to_string(),
                elapsed: record.timer().elapsed_secs(now),
                remaining,
                record,
            });
        }

        recovered
    }
}
