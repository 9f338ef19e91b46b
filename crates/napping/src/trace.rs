//! Eye-state trace files
//!
//! One JSON object per line, each the outcome of one classification:
//!
//! ```text
//! {"faces":[{"confidence":0.9,"left_eye":[[0.1,0.5],[0.2,0.5],[0.2,0.51],[0.1,0.51]]}]}
//! {"faces":[{"confidence":0.9,"left_openness":0.1,"right_openness":0.12}]}
//! {"faces":[]}
//! {"error":"vision request failed"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sleep_detect::{FaceSample, ScriptedOutcome};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TraceLine {
    #[serde(default)]
    faces: Vec<TraceFace>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TraceFace {
    confidence: f32,
    #[serde(default)]
    left_eye: Option<Vec<(f32, f32)>>,
    #[serde(default)]
    right_eye: Option<Vec<(f32, f32)>>,
    #[serde(default)]
    left_openness: Option<f32>,
    #[serde(default)]
    right_openness: Option<f32>,
}

impl TraceFace {
    /// Explicit ratios win over landmarks
    fn into_sample(self) -> FaceSample {
        let from_points = FaceSample::from_landmarks(
            self.confidence,
            self.left_eye.as_deref(),
            self.right_eye.as_deref(),
        );
        FaceSample {
            left_openness: self.left_openness.or(from_points.left_openness),
            right_openness: self.right_openness.or(from_points.right_openness),
            ..from_points
        }
    }
}

/// Parse a trace from any buffered reader
pub fn parse_trace(reader: impl BufRead) -> Result<Vec<ScriptedOutcome>> {
    let mut script = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading trace line {}", index + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed: TraceLine = serde_json::from_str(line)
            .with_context(|| format!("parsing trace line {}", index + 1))?;

        script.push(match parsed.error {
            Some(message) => Err(message),
            None => Ok(parsed.faces.into_iter().map(TraceFace::into_sample).collect()),
        });
    }

    Ok(script)
}

/// Load a trace file
pub fn load_trace(path: &Path) -> Result<Vec<ScriptedOutcome>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening trace {}", path.display()))?;
    parse_trace(std::io::BufReader::new(file))
}
