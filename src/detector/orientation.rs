//! Vertical-hold classification from gravity samples
//!
//! A device held to the ear during a call is roughly upright with its top
//! edge pointing up: gravity pulls mostly along -Y and very little along Z.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::sensors::{GravityVector, OrientationSample, SensorError};

/// |z| must stay strictly below this for the device to count as upright
const MAX_ABS_GRAVITY_Z: f64 = 0.4;
/// y must be strictly below this (top edge up)
const MAX_GRAVITY_Y: f64 = -0.7;

/// Whether a gravity vector matches the phone-call pose
pub fn is_vertical_hold(gravity: &GravityVector) -> bool {
    // NaN compares false everywhere, so bad readings classify as not vertical
    gravity.z > -MAX_ABS_GRAVITY_Z && gravity.z < MAX_ABS_GRAVITY_Z && gravity.y < MAX_GRAVITY_Y
}

/// Holds the latest vertical-hold classification
///
/// Written from the motion sensor's delivery context, read from the
/// proximity path. Last sample wins.
#[derive(Debug, Default)]
pub struct OrientationClassifier {
    vertical: AtomicBool,
}

impl OrientationClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one sample, or fall back to not-vertical on a sensor error
    pub fn observe(&self, sample: Result<OrientationSample, SensorError>) {
        match sample {
            Ok(sample) => {
                let vertical = is_vertical_hold(&sample.gravity);
                let was = self.vertical.swap(vertical, Ordering::AcqRel);
                if was != vertical {
                    debug!(
                        vertical,
                        x = sample.gravity.x,
                        y = sample.gravity.y,
                        z = sample.gravity.z,
                        age = ?sample.timestamp.elapsed(),
                        "vertical hold changed"
                    );
                }
            }
            Err(e) => {
                debug!(%e, "orientation unavailable, assuming not vertical");
                self.reset();
            }
        }
    }

    pub fn is_vertical(&self) -> bool {
        self.vertical.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.vertical.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gravity(y: f64, z: f64) -> GravityVector {
        GravityVector::new(0.0, y, z)
    }

    #[test]
    fn test_call_pose_is_vertical() {
        assert!(is_vertical_hold(&gravity(-0.9, 0.1)));
        assert!(is_vertical_hold(&gravity(-0.71, -0.39)));
        assert!(is_vertical_hold(&gravity(-1.0, 0.0)));
    }

    #[test]
    fn test_flat_and_upside_down_are_not_vertical() {
        // Flat on a table, screen up
        assert!(!is_vertical_hold(&gravity(0.0, -1.0)));
        // Upright but upside down
        assert!(!is_vertical_hold(&gravity(0.9, 0.0)));
        // Tilted too far back
        assert!(!is_vertical_hold(&gravity(-0.8, 0.6)));
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        assert!(!is_vertical_hold(&gravity(-0.9, -0.4)));
        assert!(!is_vertical_hold(&gravity(-0.9, 0.4)));
        assert!(!is_vertical_hold(&gravity(-0.7, 0.0)));
    }

    #[test]
    fn test_nan_is_not_vertical() {
        assert!(!is_vertical_hold(&gravity(f64::NAN, 0.0)));
        assert!(!is_vertical_hold(&gravity(-0.9, f64::NAN)));
    }

    #[test]
    fn test_sweep_matches_rule() {
        for yi in -20..=20 {
            for zi in -20..=20 {
                let (y, z) = (yi as f64 / 20.0, zi as f64 / 20.0);
                let expected = z > -0.4 && z < 0.4 && y < -0.7;
                assert_eq!(is_vertical_hold(&gravity(y, z)), expected, "y={y} z={z}");
            }
        }
    }

    #[test]
    fn test_classifier_last_sample_wins() {
        let classifier = OrientationClassifier::new();
        assert!(!classifier.is_vertical());

        classifier.observe(Ok(OrientationSample::now(gravity(-0.9, 0.0))));
        assert!(classifier.is_vertical());

        classifier.observe(Ok(OrientationSample::now(gravity(0.0, -1.0))));
        assert!(!classifier.is_vertical());
    }

    #[test]
    fn test_sensor_error_resets_to_false() {
        let classifier = OrientationClassifier::new();
        classifier.observe(Ok(OrientationSample::now(gravity(-0.9, 0.0))));
        classifier.observe(Err(SensorError::Unavailable("motion")));
        assert!(!classifier.is_vertical());
    }
}
