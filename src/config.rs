//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::sensors::ReferenceFrame;

/// Orientation sampling interval used by the platform: five frames at 60 Hz
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(83);

/// Default capacity for the sensor and event channels
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the motion sensor reports gravity
    pub sample_interval: Duration,

    /// Attitude reference frame requested from the motion sensor
    pub reference_frame: ReferenceFrame,

    /// Replay input file; stdin when unset
    pub input: Option<PathBuf>,

    /// Capacity of the sensor input and route event channels
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            reference_frame: ReferenceFrame::default(),
            input: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("EAR_ROUTE_SAMPLE_INTERVAL_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid EAR_ROUTE_SAMPLE_INTERVAL_MS: {raw:?}"))?;
            if ms == 0 {
                bail!("EAR_ROUTE_SAMPLE_INTERVAL_MS must be greater than zero");
            }
            config.sample_interval = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup("EAR_ROUTE_REFERENCE_FRAME") {
            config.reference_frame = match raw.trim() {
                "x_arbitrary_z_vertical" => ReferenceFrame::XArbitraryZVertical,
                "x_arbitrary_corrected_z_vertical" => ReferenceFrame::XArbitraryCorrectedZVertical,
                "x_magnetic_north_z_vertical" => ReferenceFrame::XMagneticNorthZVertical,
                other => bail!("unknown EAR_ROUTE_REFERENCE_FRAME: {other:?}"),
            };
        }

        if let Some(raw) = lookup("EAR_ROUTE_INPUT") {
            if !raw.trim().is_empty() {
                config.input = Some(PathBuf::from(raw.trim()));
            }
        }

        if let Some(raw) = lookup("EAR_ROUTE_EVENT_CAPACITY") {
            let capacity: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid EAR_ROUTE_EVENT_CAPACITY: {raw:?}"))?;
            if capacity == 0 {
                bail!("EAR_ROUTE_EVENT_CAPACITY must be greater than zero");
            }
            config.event_capacity = capacity;
        }

        Ok(config)
    }
}
