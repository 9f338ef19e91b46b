//! Sleep Detection
//!
//! Watches a camera feed for sustained eye closure:
//! - Frame throttling with single-flight classification
//! - Eye openness aggregation across detected faces
//! - Minimum-duration, cooldown and one-shot-per-episode filtering
//! - Async outputs: a continuous sleeping signal and a sleep event stream

pub mod classifier;
pub mod clock;
pub mod config;
pub mod face;
pub mod gate;
pub mod output;
pub mod pipeline;
pub mod state;

pub use classifier::{EyeStateClassifier, ReplayClassifier, ScriptedOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DetectorConfig;
pub use face::{any_eyes_closed, openness_ratio, FaceSample};
pub use gate::{FrameGate, GateDecision};
pub use output::{PipelineStats, SleepEvent};
pub use pipeline::DetectionPipeline;
pub use state::{ClosureWindow, DetectorState, Observation, SleepStateMachine};

use thiserror::Error;

/// Detection error types.
///
/// None of these are fatal to a running pipeline: a failed sample is
/// dropped and detection carries on with the next frame. Finding no face
/// is not an error at all; it counts as an eyes-open sample.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Classification timed out after {0}ms")]
    Timeout(u64),

    #[error("Degenerate eye landmarks ({points} points)")]
    DegenerateLandmarks { points: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Detection pipeline is closed")]
    Closed,

    #[error("Processing task failed: {0}")]
    Task(String),
}
