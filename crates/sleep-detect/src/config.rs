//! Detector configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DetectError;

/// Detector configuration. Fixed for the lifetime of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Sustained eye closure before sleep is declared (milliseconds)
    pub minimum_closed_ms: u64,

    /// Minimum gap between two sleep events (milliseconds)
    pub cooldown_ms: u64,

    /// Minimum spacing between classifications (milliseconds)
    pub processing_interval_ms: u64,

    /// Openness ratio below which an eye counts as closed
    pub closed_ratio_threshold: f32,

    /// Face detections below this confidence are ignored
    pub minimum_face_confidence: f32,

    /// Upper bound on a single classifier call (milliseconds)
    pub classification_timeout_ms: u64,

    /// Whether detection starts enabled
    pub enabled: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            minimum_closed_ms: 2000,
            cooldown_ms: 12_000,
            processing_interval_ms: 180,
            closed_ratio_threshold: 0.16,
            minimum_face_confidence: 0.4,
            classification_timeout_ms: 2000,
            enabled: true,
        }
    }
}

impl DetectorConfig {
    /// Create strict config (shorter closure, shorter cooldown)
    pub fn strict() -> Self {
        Self {
            minimum_closed_ms: 1200,
            cooldown_ms: 6000,
            closed_ratio_threshold: 0.2,
            ..Default::default()
        }
    }

    /// Create lenient config (longer closure, longer cooldown)
    pub fn lenient() -> Self {
        Self {
            minimum_closed_ms: 4000,
            cooldown_ms: 30_000,
            closed_ratio_threshold: 0.12,
            minimum_face_confidence: 0.6,
            ..Default::default()
        }
    }

    pub fn minimum_closed(&self) -> Duration {
        Duration::from_millis(self.minimum_closed_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }

    pub fn classification_timeout(&self) -> Duration {
        Duration::from_millis(self.classification_timeout_ms)
    }

    /// Reject values the detector cannot work with
    pub fn validate(&self) -> Result<(), DetectError> {
        if self.processing_interval_ms == 0 {
            return Err(DetectError::Config("processing_interval_ms must be positive".into()));
        }
        if self.classification_timeout_ms == 0 {
            return Err(DetectError::Config("classification_timeout_ms must be positive".into()));
        }
        if !self.closed_ratio_threshold.is_finite() || self.closed_ratio_threshold <= 0.0 {
            return Err(DetectError::Config(format!(
                "closed_ratio_threshold must be a positive number, got {}",
                self.closed_ratio_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.minimum_face_confidence) {
            return Err(DetectError::Config(format!(
                "minimum_face_confidence must be within [0, 1], got {}",
                self.minimum_face_confidence
            )));
        }
        Ok(())
    }
}
