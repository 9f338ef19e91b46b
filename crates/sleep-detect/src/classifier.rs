//! Eye state classifier seam

use std::collections::VecDeque;
use std::sync::Mutex;

use camera_capture::VideoFrame;
use tracing::debug;

use crate::face::FaceSample;
use crate::DetectError;

/// Face/eye classifier.
///
/// Given a frame, returns zero or more face detections. Calls may be slow;
/// the pipeline runs them on a blocking worker and never issues two at once.
pub trait EyeStateClassifier: Send + Sync + 'static {
    fn classify(&self, frame: &VideoFrame) -> Result<Vec<FaceSample>, DetectError>;
}

impl<F> EyeStateClassifier for F
where
    F: Fn(&VideoFrame) -> Result<Vec<FaceSample>, DetectError> + Send + Sync + 'static,
{
    fn classify(&self, frame: &VideoFrame) -> Result<Vec<FaceSample>, DetectError> {
        self(frame)
    }
}

/// Outcome of one scripted classification
pub type ScriptedOutcome = Result<Vec<FaceSample>, String>;

/// Plays back a fixed sequence of classifier outcomes, one per call.
/// Once the script runs out every frame reports no face.
pub struct ReplayClassifier {
    script: Mutex<VecDeque<ScriptedOutcome>>,
}

impl ReplayClassifier {
    pub fn new(script: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    /// Outcomes not yet played
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|script| script.len()).unwrap_or(0)
    }
}

impl EyeStateClassifier for ReplayClassifier {
    fn classify(&self, frame: &VideoFrame) -> Result<Vec<FaceSample>, DetectError> {
        let next = self
            .script
            .lock()
            .map_err(|_| DetectError::Classification("replay script lock poisoned".into()))?
            .pop_front();

        match next {
            Some(Ok(faces)) => Ok(faces),
            Some(Err(message)) => Err(DetectError::Classification(message)),
            None => {
                debug!("Replay exhausted at frame {}, reporting no face", frame.sequence);
                Ok(Vec::new())
            }
        }
    }
}
