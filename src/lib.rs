//! Workout and rest timers that keep correct time while nothing is watching.
//!
//! A [`CountdownEngine`] derives its progress from the wall-clock instant it
//! started at, so ticks that were throttled, skipped, or suspended are made
//! up for on the next tick. Every tick also writes a [`TimerRecord`] to a
//! [`TimerRecordStore`], which lets a restarted program find the timers that
//! were still counting with [`TimerRecordStore::scan_all`] and pick them up
//! again with [`CountdownEngine::restore`].
//!
//! ```
//! use std::{rc::Rc, time::Duration};
//!
//! use restclock::{Callbacks, CountdownEngine, EngineSettings, ManualClock, MemoryStorage, RecoveryStore};
//!
//! let clock = Rc::new(ManualClock::at_millis(1_711_562_400_000));
//! let store = Rc::new(RecoveryStore::new(MemoryStorage::new(), clock.clone()));
//!
//! let mut rest = CountdownEngine::new(
//!     store,
//!     clock.clone(),
//!     Callbacks::new(|remaining, _| println!("{}s left", remaining), || println!("Go!")),
//!     EngineSettings::default(),
//! );
//!
//! rest.start(90, "set-rest", None)?;
//! clock.advance(Duration::from_secs(30));
//! rest.tick();
//!
//! assert_eq!(rest.remaining(), Some(60));
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod engine;
pub mod hooks;
pub mod lifecycle;
pub mod notify;
pub mod record;
pub mod session;
pub mod store;
pub mod time;

pub use config::Config;
pub use engine::{Callbacks, CountdownEngine, EngineSettings, EngineState};
pub use lifecycle::{Beat, LifecycleEvent, Ticker};
pub use notify::{LogNotifier, Notifier, SystemdNotifier};
pub use record::TimerRecord;
pub use session::{RestKind, SessionEvent, WorkoutSession};
pub use store::{FileStorage, MemoryStorage, RecoveredTimer, RecoveryStore, Storage, TimerRecordStore};
pub use time::{Clock, DurationExt, ManualClock, SystemClock, Timer};
