//! Lossy frame hand-off between a camera and its consumer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

use crate::{CameraError, VideoFrame};

/// Default mailbox depth; anything beyond this is dropped at the source
pub const DEFAULT_MAILBOX: usize = 2;

/// Create a frame channel with the given mailbox depth
pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        FrameSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        FrameReceiver { rx, dropped },
    )
}

/// Producer side. Never blocks.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<VideoFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    /// Hand a frame over. Returns `Ok(false)` when the mailbox was full and
    /// the frame was discarded.
    pub fn send(&self, frame: VideoFrame) -> Result<bool, CameraError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(frame)) => {
                trace!("Mailbox full, dropping frame {}", frame.sequence);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => Err(CameraError::Closed),
        }
    }

    /// Frames discarded because the consumer was behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<VideoFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameReceiver {
    /// Next frame, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<VideoFrame> {
        self.rx.recv().await
    }

    /// Frames the producer discarded before they reached this receiver
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
