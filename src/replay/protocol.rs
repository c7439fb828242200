//! Replay input protocol definitions
//!
//! One JSON object per line, tagged by `type`. Blank lines and lines
//! starting with `#` are ignored.

use serde::{Deserialize, Serialize};

use crate::sensors::{FaultKind, SensorKind};

/// Audio session operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioOperation {
    Category,
    Override,
    Activation,
}

/// A single line of replay input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// Proximity sensor reports near/far
    Proximity { near: bool },

    /// Gravity reading from the motion sensor
    Orientation {
        #[serde(default)]
        x: f64,
        y: f64,
        z: f64,
    },

    /// A sensor stops working; `fault` defaults to unavailable
    SensorFault {
        sensor: SensorKind,
        #[serde(default)]
        fault: FaultKind,
    },

    /// Make an audio session operation fail (or succeed again)
    AudioFault {
        operation: AudioOperation,
        #[serde(default = "default_failing")]
        failing: bool,
    },

    /// Playback of the recording began
    PlaybackStarted,

    /// Playback reached the end
    PlaybackFinished,

    /// Pause the replay
    Wait { ms: u64 },
}

fn default_failing() -> bool {
    true
}

/// Parse one input line; `Ok(None)` for blank lines and comments
pub fn parse_line(line: &str) -> Result<Option<InputEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}
