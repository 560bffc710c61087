//! A workout made of one overall timer and a series of rest timers

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use anyhow::{bail, Result};
use log::{debug, warn};

use crate::{
    engine::{Callbacks, CountdownEngine, EngineSettings, EngineState},
    lifecycle::LifecycleEvent,
    notify::Notifier,
    store::{RecoveredTimer, TimerRecordStore},
    time::Clock,
};

pub const WORKOUT: &str = "workout";
pub const SET_REST: &str = "set-rest";
pub const EXERCISE_REST: &str = "exercise-rest";

/// Which kind of break a rest timer is for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RestKind {
    /// Between two sets of the same exercise
    Set,
    /// Between two exercises
    Exercise,
}

impl RestKind {
    pub fn category(&self) -> &'static str {
        match self {
            Self::Set => SET_REST,
            Self::Exercise => EXERCISE_REST,
        }
    }
}

/// Progress reported by the timers of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Tick {
        category: String,
        remaining: u64,
        elapsed: u64,
    },
    Completed {
        category: String,
    },
}

type EventQueue = Rc<RefCell<VecDeque<SessionEvent>>>;

/// Runs the workout-duration timer and the current rest timer side by side
///
/// Both timers share the store and clock handed to [`WorkoutSession::new`]
/// but are otherwise independent. Events from either are queued and handed
/// out by [`WorkoutSession::take_events`].
#[derive(Debug)]
pub struct WorkoutSession {
    store: Rc<dyn TimerRecordStore>,
    clock: Rc<dyn Clock>,
    settings: EngineSettings,
    notifier: Option<Rc<dyn Notifier>>,
    events: EventQueue,
    workout: Option<CountdownEngine>,
    rest: Option<CountdownEngine>,
}

impl WorkoutSession {
    pub fn new(store: Rc<dyn TimerRecordStore>, clock: Rc<dyn Clock>, settings: EngineSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            notifier: None,
            events: Rc::new(RefCell::new(VecDeque::new())),
            workout: None,
            rest: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Rc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn engine(&self, category: &str) -> CountdownEngine {
        let tick_events = self.events.clone();
        let done_events = self.events.clone();
        let tick_category = category.to_string();
        let done_category = category.to_string();

        let callbacks = Callbacks::new(
            move |remaining, elapsed| {
                tick_events.borrow_mut().push_back(SessionEvent::Tick {
                    category: tick_category.clone(),
                    remaining,
                    elapsed,
                })
            },
            move || {
                done_events.borrow_mut().push_back(SessionEvent::Completed {
                    category: done_category.clone(),
                })
            },
        );

        let engine = CountdownEngine::new(
            self.store.clone(),
            self.clock.clone(),
            callbacks,
            self.settings.clone(),
        );

        match &self.notifier {
            Some(notifier) => engine.with_notifier(notifier.clone()),
            None => engine,
        }
    }

    /// Start the overall workout timer
    pub fn start_workout(&mut self, duration_secs: u64) -> Result<String> {
        if self.workout.as_ref().is_some_and(CountdownEngine::is_running) {
            bail!("A workout is already in progress");
        }

        let mut engine = self.engine(WORKOUT);
        let key = engine.start(duration_secs, WORKOUT, None)?;
        self.workout = Some(engine);

        Ok(key)
    }

    /// Start a rest timer, abandoning the current one if it is still going
    pub fn start_rest(&mut self, duration_secs: u64, kind: RestKind) -> Result<String> {
        let mut engine = self.engine(kind.category());
        let key = engine.start(duration_secs, kind.category(), None)?;

        if let Some(mut previous) = self.rest.replace(engine) {
            debug!("Replacing the current rest timer");
            previous.stop();
        }

        Ok(key)
    }

    /// Re-attach timers recovered after a restart
    ///
    /// Timers of unknown categories are left alone.
    pub fn restore(&mut self, timers: &[RecoveredTimer]) -> Result<()> {
        for recovered in timers {
            let category = recovered.record.category();

            let slot = match category {
                WORKOUT => &mut self.workout,
                SET_REST | EXERCISE_REST => &mut self.rest,
                other => {
                    warn!("Not restoring timer {} of unknown type {}", recovered.key, other);
                    continue;
                }
            };

            if slot.as_ref().is_some_and(CountdownEngine::is_running) {
                warn!("Not restoring timer {}, a {} timer is already running", recovered.key, category);
                continue;
            }

            let mut engine = self.engine(category);
            engine.restore(recovered)?;

            let slot = match category {
                WORKOUT => &mut self.workout,
                _ => &mut self.rest,
            };
            *slot = Some(engine);
        }

        Ok(())
    }

    /// One firing of the periodic source for both timers
    pub fn tick(&mut self) {
        for engine in self.engines_mut() {
            engine.tick();
        }
    }

    pub fn handle_lifecycle(&mut self, event: LifecycleEvent) {
        for engine in self.engines_mut() {
            engine.handle_lifecycle(event);
        }
    }

    pub fn pause(&mut self) {
        for engine in self.engines_mut() {
            engine.pause();
        }
    }

    pub fn resume(&mut self) {
        for engine in self.engines_mut() {
            engine.resume();
        }
    }

    /// Stop every timer in the session
    pub fn finish(&mut self) {
        for engine in self.engines_mut() {
            engine.stop();
        }
    }

    /// Events produced since the last call, oldest first
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    pub fn workout(&self) -> Option<&CountdownEngine> {
        self.workout.as_ref()
    }

    /// The current rest timer, if one is still counting
    pub fn rest(&self) -> Option<&CountdownEngine> {
        self.rest
            .as_ref()
            .filter(|engine| engine.state() != EngineState::Completed)
    }

    fn engines_mut(&mut self) -> impl Iterator<Item = &mut CountdownEngine> {
        self.workout.iter_mut().chain(self.rest.iter_mut())
    }
}
