//! Pipeline outputs and counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Raised once per qualifying closure episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepEvent {
    /// How long the eyes had been closed when the event fired (ms)
    pub closed_for_ms: u64,
    /// Wall-clock time of the event (unix ms)
    pub detected_at_ms: u64,
}

impl SleepEvent {
    pub(crate) fn now(closed_for: Duration) -> Self {
        let detected_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            closed_for_ms: closed_for.as_millis() as u64,
            detected_at_ms,
        }
    }
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub frames_received: u64,
    pub dropped_busy: u64,
    pub dropped_throttled: u64,
    pub dropped_disabled: u64,
    pub classified: u64,
    pub failed: u64,
    /// Results that landed after detection was disabled
    pub discarded: u64,
    pub events_fired: u64,
}

impl PipelineStats {
    /// Frames that never reached the classifier
    pub fn dropped(&self) -> u64 {
        self.dropped_busy + self.dropped_throttled + self.dropped_disabled
    }
}

/// Live counters, written by the processing task
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub frames_received: AtomicU64,
    pub dropped_busy: AtomicU64,
    pub dropped_throttled: AtomicU64,
    pub dropped_disabled: AtomicU64,
    pub classified: AtomicU64,
    pub failed: AtomicU64,
    pub discarded: AtomicU64,
    pub events_fired: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            dropped_busy: self.dropped_busy.load(Ordering::Relaxed),
            dropped_throttled: self.dropped_throttled.load(Ordering::Relaxed),
            dropped_disabled: self.dropped_disabled.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            events_fired: self.events_fired.load(Ordering::Relaxed),
        }
    }
}
