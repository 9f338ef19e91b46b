//! Per-face eye measurements and the closed-eye decision

use serde::{Deserialize, Serialize};

use crate::{DetectError, DetectorConfig};

/// Fewer landmark points than this and an eye is untrackable
pub const MIN_EYE_POINTS: usize = 4;

/// Narrower eye bounding boxes are degenerate
pub const MIN_EYE_WIDTH: f32 = 0.0001;

/// Height-to-width ratio of an eye's landmark bounding box.
///
/// Points are normalized `(x, y)` coordinates. Lower values mean a more
/// closed eye.
pub fn openness_ratio(points: &[(f32, f32)]) -> Result<f32, DetectError> {
    if points.len() < MIN_EYE_POINTS {
        return Err(DetectError::DegenerateLandmarks { points: points.len() });
    }

    let mut min_x = f32::MAX;
    let mut max_x = f32::MIN;
    let mut min_y = f32::MAX;
    let mut max_y = f32::MIN;

    for &(x, y) in points {
        if !x.is_finite() || !y.is_finite() {
            return Err(DetectError::DegenerateLandmarks { points: points.len() });
        }
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }

    let width = max_x - min_x;
    let height = max_y - min_y;

    // A vertical line of points has no usable ratio
    if width < MIN_EYE_WIDTH {
        return Err(DetectError::DegenerateLandmarks { points: points.len() });
    }

    Ok(height / width.max(MIN_EYE_WIDTH))
}

/// One face detection as reported by the classifier.
///
/// Ephemeral: produced per classification call and never retained.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceSample {
    /// Detection confidence (0-1)
    pub confidence: f32,
    /// Left eye openness ratio, if measurable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_openness: Option<f32>,
    /// Right eye openness ratio, if measurable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_openness: Option<f32>,
}

impl FaceSample {
    pub fn new(confidence: f32, left_openness: Option<f32>, right_openness: Option<f32>) -> Self {
        Self {
            confidence,
            left_openness,
            right_openness,
        }
    }

    /// Build a sample from raw eye landmarks. An eye whose landmarks are
    /// degenerate is reported as unmeasurable.
    pub fn from_landmarks(
        confidence: f32,
        left_eye: Option<&[(f32, f32)]>,
        right_eye: Option<&[(f32, f32)]>,
    ) -> Self {
        Self {
            confidence,
            left_openness: left_eye.and_then(|points| openness_ratio(points).ok()),
            right_openness: right_eye.and_then(|points| openness_ratio(points).ok()),
        }
    }

    /// Average of the measurable eyes, or the single one available
    pub fn openness(&self) -> Option<f32> {
        match (self.left_openness, self.right_openness) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            (Some(l), None) => Some(l),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        }
    }

    /// A face with neither eye measurable never counts as closed
    pub fn eyes_closed(&self, closed_ratio_threshold: f32) -> bool {
        self.openness()
            .map(|ratio| ratio < closed_ratio_threshold)
            .unwrap_or(false)
    }
}

/// True if any sufficiently confident face has closed eyes.
///
/// No faces at all is an eyes-open sample.
pub fn any_eyes_closed(faces: &[FaceSample], config: &DetectorConfig) -> bool {
    faces
        .iter()
        .filter(|face| face.confidence >= config.minimum_face_confidence)
        .any(|face| face.eyes_closed(config.closed_ratio_threshold))
}
