//! Paced stand-in for a physical camera

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::{CameraConfig, CameraError, FrameSender, VideoFrame};

/// Emits blank frames at the configured rate
pub struct SyntheticCamera {
    config: CameraConfig,
    sequence: u64,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        if config.fps == 0 {
            return Err(CameraError::Format("fps must be at least 1".into()));
        }
        Ok(Self { config, sequence: 0 })
    }

    /// Interval between frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.fps as f64)
    }

    /// Build the next frame without pacing
    pub fn next_frame(&mut self) -> VideoFrame {
        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let frame = VideoFrame::blank(
            self.config.width,
            self.config.height,
            self.config.format,
            timestamp_ns,
            self.sequence,
        );
        self.sequence += 1;
        frame
    }

    /// Push frames into `sender` until the consumer goes away
    pub async fn run(&mut self, sender: FrameSender) -> Result<(), CameraError> {
        info!(
            "Starting synthetic camera {}x{} @ {}fps",
            self.config.width, self.config.height, self.config.fps
        );

        let mut ticker = tokio::time::interval(self.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let frame = self.next_frame();
            match sender.send(frame) {
                Ok(_) => {}
                Err(CameraError::Closed) => break,
                Err(e) => return Err(e),
            }
        }

        debug!("Synthetic camera stopped after {} frames ({} dropped)", self.sequence, sender.dropped());
        Ok(())
    }

    /// Frames produced so far
    pub fn frames_emitted(&self) -> u64 {
        self.sequence
    }
}
