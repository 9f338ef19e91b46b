//! Sleep state tracking
//!
//! Turns a stream of "eyes closed this sample" booleans into a debounced
//! sleeping signal plus a one-shot event per closure episode, gated by a
//! cooldown that spans episodes.

use std::time::{Duration, Instant};

use crate::DetectorConfig;

/// Span during which eyes have been continuously observed closed.
/// Empty while eyes are open or before any sample arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosureWindow {
    closed_since: Option<Instant>,
}

impl ClosureWindow {
    /// Start of the current episode, if one is running
    pub fn closed_since(&self) -> Option<Instant> {
        self.closed_since
    }

    /// Open the window at `now` unless one is already running
    fn extend(&mut self, now: Instant) {
        self.closed_since.get_or_insert(now);
    }

    fn clear(&mut self) {
        self.closed_since = None;
    }

    /// Elapsed closed time at `now`, zero when no episode is running
    pub fn duration(&self, now: Instant) -> Duration {
        self.closed_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or(Duration::ZERO)
    }
}

/// Detector state (tracked over time)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorState {
    /// Continuous sleeping signal
    pub is_sleeping: bool,

    /// Event already fired for the running episode
    pub has_fired_for_current_episode: bool,

    /// Last time an event fired; `None` until the first one
    pub last_event_at: Option<Instant>,
}

/// Result of feeding one sample to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub is_sleeping: bool,
    pub fired: bool,
    /// Closed duration at the time of the sample
    pub closed_for: Duration,
}

/// Temporal filter over eye-closed samples
#[derive(Debug, Clone)]
pub struct SleepStateMachine {
    minimum_closed: Duration,
    cooldown: Duration,
    window: ClosureWindow,
    state: DetectorState,
}

impl SleepStateMachine {
    pub fn new(config: &DetectorConfig) -> Self {
        Self::with_durations(config.minimum_closed(), config.cooldown())
    }

    pub fn with_durations(minimum_closed: Duration, cooldown: Duration) -> Self {
        Self {
            minimum_closed,
            cooldown,
            window: ClosureWindow::default(),
            state: DetectorState::default(),
        }
    }

    /// Feed one classified sample taken at `now`
    pub fn observe(&mut self, any_eyes_closed: bool, now: Instant) -> Observation {
        if any_eyes_closed {
            self.window.extend(now);
        } else {
            // Any open sample ends the episode and re-arms the event
            self.window.clear();
            self.state.has_fired_for_current_episode = false;
        }

        let closed_for = self.window.duration(now);
        let sleeping_now = any_eyes_closed && closed_for >= self.minimum_closed;

        if !sleeping_now {
            self.state.has_fired_for_current_episode = false;
        }

        let cooled_down = self
            .state
            .last_event_at
            .map(|last| now.saturating_duration_since(last) >= self.cooldown)
            .unwrap_or(true);

        let fired = sleeping_now && !self.state.has_fired_for_current_episode && cooled_down;
        if fired {
            self.state.last_event_at = Some(now);
            self.state.has_fired_for_current_episode = true;
        }

        self.state.is_sleeping = sleeping_now;

        Observation {
            is_sleeping: sleeping_now,
            fired,
            closed_for,
        }
    }

    /// Drop the running episode and force the signal to awake.
    /// The cooldown clock survives.
    pub fn reset(&mut self) {
        self.window.clear();
        self.state.has_fired_for_current_episode = false;
        self.state.is_sleeping = false;
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn window(&self) -> &ClosureWindow {
        &self.window
    }

    pub fn is_sleeping(&self) -> bool {
        self.state.is_sleeping
    }
}
