//! Camera Capture
//!
//! Frame types and the hand-off from a camera to the sleep detector:
//! - Opaque, cheaply cloned video frames
//! - A lossy frame channel that never blocks the producer
//! - A synthetic paced camera for demos and replay runs

pub mod frame;
pub mod source;
pub mod synthetic;

pub use frame::{PixelFormat, VideoFrame};
pub use source::{frame_channel, FrameReceiver, FrameSender, DEFAULT_MAILBOX};
pub use synthetic::SyntheticCamera;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Frame consumer closed")]
    Closed,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Output pixel format
    #[serde(skip)]
    pub format: PixelFormat,
    /// Frames the consumer may have queued before new ones are dropped
    pub mailbox: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Bgra32,
            mailbox: DEFAULT_MAILBOX,
        }
    }
}
