//! Frame throttling and single-flight control

use std::time::{Duration, Instant};

/// What to do with an arriving frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Classify this frame
    Admit,
    /// A classification is still running
    DropBusy,
    /// Too soon after the last admitted frame
    DropThrottled,
}

/// Throttles frames to a bounded processing rate and allows at most one
/// classification in flight. Frames are never queued.
#[derive(Debug, Clone)]
pub struct FrameGate {
    interval: Duration,
    last_processed_at: Option<Instant>,
    in_flight: bool,
}

impl FrameGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_processed_at: None,
            in_flight: false,
        }
    }

    /// Decide on a frame arriving at `now`. Admitting marks the gate busy
    /// until [`FrameGate::complete`] is called.
    pub fn admit(&mut self, now: Instant) -> GateDecision {
        if self.in_flight {
            return GateDecision::DropBusy;
        }

        if let Some(last) = self.last_processed_at {
            if now.saturating_duration_since(last) < self.interval {
                return GateDecision::DropThrottled;
            }
        }

        self.in_flight = true;
        self.last_processed_at = Some(now);
        GateDecision::Admit
    }

    /// Classification finished, successfully or not
    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_processed_at(&self) -> Option<Instant> {
        self.last_processed_at
    }
}
