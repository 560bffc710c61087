//! The countdown engine that drives workout and rest timers.
//!
//! A [`CountdownEngine`] never counts ticks. Every tick recomputes elapsed
//! and remaining time from the wall-clock instant the timer started, so a
//! host that throttles or suspends the tick source only delays the display;
//! the next tick, or the reconciliation that follows
//! [`LifecycleEvent::Resumed`], reports the corrected value and completes the
//! timer if it ran out in the meantime.
//!
//! ## States
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --resume--> Running
//! Running/Paused --time runs out--> Completed
//! Running/Paused --stop--> Stopped
//! ```
//!
//! `Completed` and `Stopped` are terminal. The completion callback fires
//! exactly once, and only on the way into `Completed`.

use std::{
    fmt,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use anyhow::{bail, Result};
use log::{debug, info, warn};

use crate::{
    lifecycle::LifecycleEvent,
    notify::Notifier,
    record::TimerRecord,
    store::{RecoveredTimer, TimerRecordStore},
    time::{millis, Clock, Timer},
};

// Disambiguates keys generated in the same millisecond within one process.
// Holds no timer state.
static KEY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Where an engine is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
}

/// Consumer hooks for progress and completion
pub struct Callbacks {
    on_tick: Box<dyn FnMut(u64, u64)>,
    on_complete: Box<dyn FnMut()>,
}

impl Callbacks {
    /// `on_tick` receives `(remaining, elapsed)` in whole seconds
    pub fn new(on_tick: impl FnMut(u64, u64) + 'static, on_complete: impl FnMut() + 'static) -> Self {
        Self {
            on_tick: Box::new(on_tick),
            on_complete: Box::new(on_complete),
        }
    }

    /// Callbacks that do nothing
    pub fn none() -> Self {
        Self::new(|_, _| {}, || {})
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

/// Tunables for a [`CountdownEngine`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// How close to expiry the notifier is asked to alert; zero disables alerts
    pub warn_before: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            warn_before: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
struct Countdown {
    key: String,
    category: String,
    timer: Timer,
}

/// A single countdown that survives its host being suspended
///
/// The engine does not own a thread or a real timer. Whoever drives it calls
/// [`tick`](Self::tick) about once per second and forwards host
/// [`LifecycleEvent`]s to [`handle_lifecycle`](Self::handle_lifecycle).
/// [`is_ticking`](Self::is_ticking) tells the driver whether the periodic
/// source should be firing at all.
///
/// Owners must call [`stop`](Self::stop) before discarding an engine that
/// has not completed, or its record stays in the store for recovery.
#[derive(Debug)]
pub struct CountdownEngine {
    store: Rc<dyn TimerRecordStore>,
    clock: Rc<dyn Clock>,
    callbacks: Callbacks,
    notifier: Option<Rc<dyn Notifier>>,
    settings: EngineSettings,
    countdown: Option<Countdown>,
    state: EngineState,
    ticking: bool,
    attached: bool,
    warned: bool,
}

impl CountdownEngine {
    pub fn new(
        store: Rc<dyn TimerRecordStore>,
        clock: Rc<dyn Clock>,
        callbacks: Callbacks,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            callbacks,
            notifier: None,
            settings,
            countdown: None,
            state: EngineState::Idle,
            ticking: false,
            attached: false,
            warned: false,
        }
    }

    /// Ask `notifier` for an alert shortly before the timer runs out
    pub fn with_notifier(mut self, notifier: Rc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Start counting down `duration_secs` seconds from now
    ///
    /// Without a `persistence_key`, one is made up from the category and the
    /// current instant. Returns the key the timer is stored under. The tick
    /// callback fires once before this returns.
    pub fn start(
        &mut self,
        duration_secs: u64,
        category: &str,
        persistence_key: Option<&str>,
    ) -> Result<String> {
        if duration_secs == 0 {
            bail!("Timer duration must be at least one second");
        }

        if category.trim().is_empty() {
            bail!("Timer category must not be empty");
        }

        if self.state != EngineState::Idle {
            bail!("This timer was already started");
        }

        let now = self.clock.now();

        let key = match persistence_key {
            Some(key) if key.trim().is_empty() => bail!("Persistence key must not be empty"),
            Some(key) => key.to_string(),
            None => generate_key(category, now),
        };

        self.launch(Countdown {
            key: key.clone(),
            category: category.to_string(),
            timer: Timer::new(now, Duration::from_secs(duration_secs)),
        });

        Ok(key)
    }

    /// Pick up a timer found by [`TimerRecordStore::scan_all`]
    ///
    /// The stored start time is kept, so the first tick reports the time
    /// that passed while nothing was running, and completes the timer if it
    /// ran out in the meantime.
    pub fn restore(&mut self, recovered: &RecoveredTimer) -> Result<()> {
        if self.state != EngineState::Idle {
            bail!("Cannot restore timer {} into an engine that was already started", recovered.key);
        }

        self.launch(Countdown {
            key: recovered.key.clone(),
            category: recovered.record.category().to_string(),
            timer: recovered.record.timer().clone(),
        });

        Ok(())
    }

    fn launch(&mut self, countdown: Countdown) {
        info!(
            "Starting {} timer {} for {}s",
            countdown.category,
            countdown.key,
            countdown.timer.duration().as_secs()
        );

        self.countdown = Some(countdown);
        self.state = EngineState::Running;
        self.attached = true;
        self.ticking = true;
        self.warned = false;

        self.process_tick();
    }

    /// One firing of the periodic source; does nothing while it is stopped
    pub fn tick(&mut self) {
        if self.ticking {
            self.process_tick();
        }
    }

    fn process_tick(&mut self) {
        let now = self.clock.now();

        let Some((remaining, elapsed)) = self
            .countdown
            .as_ref()
            .map(|c| (c.timer.remaining_secs(now), c.timer.elapsed_secs(now)))
        else {
            return;
        };

        self.persist(now);
        (self.callbacks.on_tick)(remaining, elapsed);

        if remaining == 0 {
            self.complete();
        } else {
            self.warn_if_close(remaining);
        }
    }

    fn persist(&self, now: SystemTime) {
        if let Some(countdown) = &self.countdown {
            let record = TimerRecord::running(countdown.timer.clone(), &countdown.category, now);
            self.store.write(&countdown.key, &record);
        }
    }

    fn warn_if_close(&mut self, remaining: u64) {
        if self.warned || remaining > self.settings.warn_before.as_secs() {
            return;
        }

        self.warned = true;

        let (Some(notifier), Some(countdown)) = (&self.notifier, &self.countdown) else {
            return;
        };

        let title = format!("{} timer", countdown.category);
        let body = format!("{} is over", countdown.category);

        if let Err(e) = notifier.schedule(Duration::from_secs(remaining), &title, &body) {
            warn!("Unable to schedule notification for {}: {:#}", countdown.key, e);
        }
    }

    /// Finish the countdown and fire the completion callback
    ///
    /// Does nothing unless the timer is running or paused, so the callback
    /// fires at most once.
    pub fn complete(&mut self) {
        if !self.is_running() {
            return;
        }

        self.ticking = false;
        self.attached = false;
        self.state = EngineState::Completed;

        if let Some(countdown) = &self.countdown {
            info!("{} timer {} finished", countdown.category, countdown.key);
            self.store.remove(&countdown.key);
        }

        (self.callbacks.on_complete)();
    }

    /// Stop the periodic source without stopping the clock
    ///
    /// Time keeps counting against the timer while it is paused.
    pub fn pause(&mut self) {
        if self.state == EngineState::Running {
            debug!("Pausing ticks");
            self.ticking = false;
            self.state = EngineState::Paused;
        }
    }

    /// Restart the periodic source if the timer is running without one
    pub fn resume(&mut self) {
        if self.is_running() && !self.ticking {
            debug!("Resuming ticks");
            self.ticking = true;
            self.state = EngineState::Running;
        }
    }

    /// Abandon the timer without firing the completion callback
    ///
    /// Safe to call any number of times.
    pub fn stop(&mut self) {
        let was_running = self.is_running();

        self.ticking = false;
        self.attached = false;

        if was_running {
            if let Some(countdown) = &self.countdown {
                info!("Stopping {} timer {}", countdown.category, countdown.key);
                self.store.remove(&countdown.key);
            }
        }

        if was_running || self.state == EngineState::Idle {
            self.state = EngineState::Stopped;
        }
    }

    /// React to the host losing or regaining control
    ///
    /// Ignored once the engine has completed or stopped.
    pub fn handle_lifecycle(&mut self, event: LifecycleEvent) {
        if !self.attached {
            return;
        }

        match event {
            LifecycleEvent::Suspended => {
                debug!("Host suspended, ticks stop until it resumes");
                self.ticking = false;
                self.persist(self.clock.now());
            }
            LifecycleEvent::Resumed => self.reconcile(),
        }
    }

    /// Catch up with the wall clock after ticks were missed
    ///
    /// Completes the timer if it ran out, otherwise restarts ticking (unless
    /// paused) and fires a tick with the corrected values.
    pub fn reconcile(&mut self) {
        if !self.is_running() {
            return;
        }

        if self.remaining() == Some(0) {
            debug!("Timer ran out while ticks were suspended");
            self.complete();
            return;
        }

        if self.state == EngineState::Running {
            self.ticking = true;
            self.process_tick();
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Whether the timer is running or paused
    pub fn is_running(&self) -> bool {
        matches!(self.state, EngineState::Running | EngineState::Paused)
    }

    /// Whether the periodic source should be firing
    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    pub fn key(&self) -> Option<&str> {
        self.countdown.as_ref().map(|c| c.key.as_str())
    }

    pub fn category(&self) -> Option<&str> {
        self.countdown.as_ref().map(|c| c.category.as_str())
    }

    pub fn timer(&self) -> Option<&Timer> {
        self.countdown.as_ref().map(|c| &c.timer)
    }

    /// Whole seconds left, from the wall clock
    pub fn remaining(&self) -> Option<u64> {
        self.timer().map(|t| t.remaining_secs(self.clock.now()))
    }

    /// Whole seconds passed, from the wall clock
    pub fn elapsed(&self) -> Option<u64> {
        self.timer().map(|t| t.elapsed_secs(self.clock.now()))
    }
}

fn generate_key(category: &str, now: SystemTime) -> String {
    let sequence = KEY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", category, millis::from_system_time(now), sequence)
}

#[cfg(test)]
mod test {
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
        time::Duration,
    };

    use anyhow::{anyhow, Result};

    use crate::{
        lifecycle::LifecycleEvent,
        notify::Notifier,
        store::{MemoryStorage, RecoveryStore, Storage, TimerRecordStore},
        time::ManualClock,
    };

    use super::{Callbacks, CountdownEngine, EngineSettings, EngineState};

    const NOW: u64 = 1_711_562_400_000;

    struct Harness {
        clock: ManualClock,
        storage: MemoryStorage,
        store: Rc<RecoveryStore<MemoryStorage>>,
        ticks: Rc<RefCell<Vec<(u64, u64)>>>,
        completions: Rc<Cell<usize>>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = ManualClock::at_millis(NOW);
            let storage = MemoryStorage::new();
            let store = Rc::new(RecoveryStore::new(storage.clone(), Rc::new(clock.clone())));

            Self {
                clock,
                storage,
                store,
                ticks: Rc::new(RefCell::new(Vec::new())),
                completions: Rc::new(Cell::new(0)),
            }
        }

        fn engine(&self) -> CountdownEngine {
            let ticks = self.ticks.clone();
            let completions = self.completions.clone();

            CountdownEngine::new(
                self.store.clone(),
                Rc::new(self.clock.clone()),
                Callbacks::new(
                    move |remaining, elapsed| ticks.borrow_mut().push((remaining, elapsed)),
                    move || completions.set(completions.get() + 1),
                ),
                EngineSettings::default(),
            )
        }

        fn advance(&self, secs: u64) {
            self.clock.advance(Duration::from_secs(secs));
        }

        fn ticks(&self) -> Vec<(u64, u64)> {
            self.ticks.borrow().clone()
        }
    }

    #[test]
    fn ten_second_rest() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(10, "rest", None).unwrap();
        assert_eq!(h.ticks(), vec![(10, 0)]);

        for _ in 1..=10 {
            h.advance(1);
            engine.tick();
        }

        let expected: Vec<(u64, u64)> = (0..=10).map(|e| (10 - e, e)).collect();
        assert_eq!(h.ticks(), expected);
        assert_eq!(h.completions.get(), 1);
        assert_eq!(engine.state(), EngineState::Completed);
        assert!(!engine.is_ticking());

        h.advance(1);
        engine.tick();

        assert_eq!(h.ticks().len(), 11);
        assert_eq!(h.completions.get(), 1);
        assert!(h.storage.is_empty());
    }

    #[test]
    fn remaining_only_decreases() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(30, "set-rest", None).unwrap();

        for ms in [300, 1_700, 999, 1, 2_500, 4_000, 800] {
            h.clock.advance(Duration::from_millis(ms));
            engine.tick();
        }

        let ticks = h.ticks();
        for (remaining, elapsed) in &ticks {
            assert_eq!(remaining + elapsed, 30);
        }
        for pair in ticks.windows(2) {
            assert!(pair[1].0 <= pair[0].0);
        }
        assert_eq!(ticks.last(), Some(&(20, 10)));
    }

    #[test]
    fn long_gap_clamps_to_zero() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(60, "workout", None).unwrap();
        h.advance(5 * 60);
        engine.tick();

        assert_eq!(h.ticks(), vec![(60, 0), (0, 60)]);
        assert_eq!(h.completions.get(), 1);
    }

    #[test]
    fn resume_after_background_completes_once() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(60, "set-rest", None).unwrap();
        engine.handle_lifecycle(LifecycleEvent::Suspended);
        assert!(!engine.is_ticking());

        h.advance(70);
        engine.tick();
        assert_eq!(h.completions.get(), 0);

        engine.handle_lifecycle(LifecycleEvent::Resumed);

        assert_eq!(h.completions.get(), 1);
        assert_eq!(h.ticks(), vec![(60, 0)]);
        assert_eq!(engine.state(), EngineState::Completed);
        assert!(h.storage.is_empty());

        engine.handle_lifecycle(LifecycleEvent::Resumed);
        engine.reconcile();
        assert_eq!(h.completions.get(), 1);
    }

    #[test]
    fn resume_with_time_left_snaps_display() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(60, "exercise-rest", None).unwrap();
        engine.handle_lifecycle(LifecycleEvent::Suspended);
        h.advance(20);
        engine.handle_lifecycle(LifecycleEvent::Resumed);

        assert_eq!(h.ticks(), vec![(60, 0), (40, 20)]);
        assert!(engine.is_ticking());
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn complete_is_idempotent() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(60, "workout", None).unwrap();
        engine.complete();
        engine.complete();

        assert_eq!(h.completions.get(), 1);
        assert_eq!(engine.state(), EngineState::Completed);
    }

    #[test]
    fn pause_keeps_the_clock_running() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(30, "set-rest", Some("k1")).unwrap();
        h.advance(1);
        engine.tick();

        engine.pause();
        assert_eq!(engine.state(), EngineState::Paused);
        h.advance(5);
        engine.tick();
        assert_eq!(h.ticks(), vec![(30, 0), (29, 1)]);
        assert!(h.store.read("k1").is_some());
        assert_eq!(engine.elapsed(), Some(6));
        assert_eq!(engine.remaining(), Some(24));

        engine.resume();
        h.advance(1);
        engine.tick();

        assert_eq!(h.ticks().last(), Some(&(23, 7)));
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn paused_timer_still_expires_on_resume_signal() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(10, "set-rest", None).unwrap();
        engine.pause();
        h.advance(3);
        engine.handle_lifecycle(LifecycleEvent::Resumed);
        assert_eq!(engine.state(), EngineState::Paused);
        assert_eq!(h.ticks().len(), 1);

        h.advance(10);
        engine.handle_lifecycle(LifecycleEvent::Resumed);
        assert_eq!(h.completions.get(), 1);
    }

    #[test]
    fn stop_clears_record_and_detaches() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(30, "workout", Some("w")).unwrap();
        assert!(!h.storage.is_empty());

        engine.stop();
        engine.stop();

        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(h.storage.is_empty());

        h.advance(60);
        engine.handle_lifecycle(LifecycleEvent::Resumed);
        engine.resume();
        engine.tick();
        engine.complete();

        assert_eq!(h.ticks().len(), 1);
        assert_eq!(h.completions.get(), 0);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let h = Harness::new();
        let mut engine = h.engine();

        assert!(engine.start(0, "set-rest", None).is_err());
        assert!(engine.start(30, "  ", None).is_err());
        assert!(engine.start(30, "set-rest", Some("")).is_err());
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(h.ticks().is_empty());
        assert!(h.storage.is_empty());

        engine.start(30, "set-rest", None).unwrap();
        assert!(engine.start(30, "set-rest", None).is_err());
    }

    #[test]
    fn every_tick_rewrites_the_record() {
        let h = Harness::new();
        let mut engine = h.engine();

        engine.start(30, "set-rest", Some("k1")).unwrap();
        let first = h.store.read("k1").unwrap();

        h.advance(4);
        engine.tick();
        let second = h.store.read("k1").unwrap();

        assert_eq!(first.timer(), second.timer());
        assert_eq!(
            second.saved_at().duration_since(first.saved_at()).unwrap(),
            Duration::from_secs(4)
        );
        assert_eq!(h.storage.len(), 1);
    }

    #[test]
    fn generated_keys_are_unique() {
        let h = Harness::new();
        let mut a = h.engine();
        let mut b = h.engine();

        let key_a = a.start(30, "set-rest", None).unwrap();
        let key_b = b.start(30, "set-rest", None).unwrap();

        assert!(key_a.starts_with("set-rest-1711562400000-"));
        assert_ne!(key_a, key_b);
        assert_eq!(h.storage.len(), 2);
    }

    #[test]
    fn recovers_after_full_restart() {
        let h = Harness::new();

        {
            let mut engine = h.engine();
            engine.start(30, "set-rest", Some("k1")).unwrap();
        }

        h.clock.advance(Duration::from_millis(7_300));

        let fresh = RecoveryStore::new(h.storage.clone(), Rc::new(h.clock.clone()));
        let found = fresh.scan_all();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "k1");
        assert_eq!(found[0].remaining, 23);
        assert_eq!(found[0].elapsed, 7);

        let h2 = Harness {
            clock: h.clock.clone(),
            storage: h.storage.clone(),
            store: Rc::new(fresh),
            ticks: Rc::new(RefCell::new(Vec::new())),
            completions: Rc::new(Cell::new(0)),
        };
        let mut engine = h2.engine();
        engine.restore(&found[0]).unwrap();

        assert_eq!(h2.ticks(), vec![(23, 7)]);
        assert_eq!(engine.key(), Some("k1"));

        h2.advance(23);
        engine.tick();
        assert_eq!(h2.completions.get(), 1);
        assert!(h2.storage.is_empty());
    }

    #[derive(Debug)]
    struct FullStorage;

    impl Storage for FullStorage {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow!("quota exceeded"))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Err(anyhow!("quota exceeded"))
        }

        fn keys(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn counts_in_memory_when_storage_fails() {
        let h = Harness::new();
        let ticks = h.ticks.clone();
        let completions = h.completions.clone();

        let mut engine = CountdownEngine::new(
            Rc::new(RecoveryStore::new(FullStorage, Rc::new(h.clock.clone()))),
            Rc::new(h.clock.clone()),
            Callbacks::new(
                move |remaining, elapsed| ticks.borrow_mut().push((remaining, elapsed)),
                move || completions.set(completions.get() + 1),
            ),
            EngineSettings::default(),
        );

        engine.start(3, "set-rest", None).unwrap();
        for _ in 0..3 {
            h.advance(1);
            engine.tick();
        }

        assert_eq!(h.ticks(), vec![(3, 0), (2, 1), (1, 2), (0, 3)]);
        assert_eq!(h.completions.get(), 1);
    }

    #[derive(Debug, Default)]
    struct RecordingNotifier {
        requests: RefCell<Vec<(Duration, String)>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn schedule(&self, after: Duration, title: &str, _body: &str) -> Result<()> {
            self.requests.borrow_mut().push((after, title.to_string()));

            if self.fail {
                Err(anyhow!("no notification daemon"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn notifies_once_near_expiry() {
        let h = Harness::new();
        let notifier = Rc::new(RecordingNotifier::default());
        let mut engine = h.engine().with_notifier(notifier.clone());

        engine.start(10, "set-rest", None).unwrap();
        for _ in 0..10 {
            h.advance(1);
            engine.tick();
        }

        assert_eq!(
            *notifier.requests.borrow(),
            vec![(Duration::from_secs(5), "set-rest timer".to_string())]
        );
        assert_eq!(h.completions.get(), 1);
    }

    #[test]
    fn failing_notifier_does_not_affect_timing() {
        let h = Harness::new();
        let notifier = Rc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let mut engine = h.engine().with_notifier(notifier.clone());

        engine.start(3, "set-rest", None).unwrap();
        for _ in 0..3 {
            h.advance(1);
            engine.tick();
        }

        assert_eq!(notifier.requests.borrow().len(), 1);
        assert_eq!(h.ticks().last(), Some(&(0, 3)));
        assert_eq!(h.completions.get(), 1);
    }
}
