//! Sensor module for proximity and motion input
//!
//! Defines the collaborator traits the detector consumes, the orientation
//! sample types, and simulated sensors that deliver callbacks on a
//! dedicated background thread.

mod delivery;
mod simulated;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub use delivery::{SensorDelivery, SensorInput};
pub use simulated::{SimulatedMotion, SimulatedProximity};

/// Handler invoked with the new proximity state (`true` = object near), or
/// with the error that ended monitoring
pub type ProximityHandler =
    Arc<dyn Fn(Result<bool, SensorError>) + Send + Sync + 'static>;

/// Handler invoked for every orientation sample or sensor failure
pub type OrientationHandler =
    Arc<dyn Fn(Result<OrientationSample, SensorError>) + Send + Sync + 'static>;

/// Gravity vector in device coordinates, in fractions of g
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GravityVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GravityVector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A single reading from the motion sensor
#[derive(Debug, Clone, Copy)]
pub struct OrientationSample {
    pub gravity: GravityVector,
    pub timestamp: Instant,
}

impl OrientationSample {
    /// Create a sample stamped with the current time
    pub fn now(gravity: GravityVector) -> Self {
        Self {
            gravity,
            timestamp: Instant::now(),
        }
    }
}

/// Reference frame the attitude is reported in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferenceFrame {
    /// Z axis vertical, X axis arbitrary in the horizontal plane
    #[default]
    XArbitraryZVertical,
    /// Same as above with magnetometer-corrected yaw
    XArbitraryCorrectedZVertical,
    /// Z vertical, X towards magnetic north
    XMagneticNorthZVertical,
}

/// Proximity sensor collaborator
pub trait ProximitySensor: Send + Sync {
    /// Turn proximity monitoring on or off
    fn set_monitoring_enabled(&self, enabled: bool) -> Result<(), SensorError>;

    /// Register the handler for state-change notifications, replacing any
    /// previous one
    fn subscribe(&self, handler: ProximityHandler) -> Result<(), SensorError>;

    /// Drop the registered handler, if any
    fn unsubscribe(&self);
}

/// Motion (attitude) sensor collaborator
pub trait MotionSensor: Send + Sync {
    /// Begin delivering samples at `interval`
    fn start_updates(
        &self,
        interval: Duration,
        frame: ReferenceFrame,
        handler: OrientationHandler,
    ) -> Result<(), SensorError>;

    /// Stop delivering samples; no-op if not started
    fn stop_updates(&self);
}

/// Errors reported by sensor collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum SensorError {
    #[error("{0} sensor is not available on this device")]
    Unavailable(&'static str),

    #[error("permission to use the {0} sensor was denied")]
    PermissionDenied(&'static str),

    #[error("sensor delivery is already running")]
    AlreadyRunning,

    #[error("failed to spawn sensor delivery thread: {0}")]
    ThreadSpawn(String),

    #[error("sensor delivery channel closed")]
    DeliveryClosed,
}

/// Which physical sensor an input or fault refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Proximity,
    Motion,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Proximity => "proximity",
            SensorKind::Motion => "motion",
        }
    }
}

/// How a sensor stopped working
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Hardware went away or stopped reporting
    #[default]
    Unavailable,
    /// The user revoked access
    PermissionDenied,
}

impl FaultKind {
    /// The error a sensor of `kind` reports for this fault
    pub fn error(self, kind: SensorKind) -> SensorError {
        match self {
            FaultKind::Unavailable => SensorError::Unavailable(kind.as_str()),
            FaultKind::PermissionDenied => SensorError::PermissionDenied(kind.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kind_maps_to_error() {
        assert!(matches!(
            FaultKind::Unavailable.error(SensorKind::Proximity),
            SensorError::Unavailable("proximity")
        ));
        assert!(matches!(
            FaultKind::PermissionDenied.error(SensorKind::Motion),
            SensorError::PermissionDenied("motion")
        ));
    }

    #[test]
    fn test_fault_kind_defaults_to_unavailable() {
        assert_eq!(FaultKind::default(), FaultKind::Unavailable);
        let fault: FaultKind = serde_json::from_str(r#""permission_denied""#).unwrap();
        assert_eq!(fault, FaultKind::PermissionDenied);
    }

    #[test]
    fn test_permission_error_message() {
        let e = SensorError::PermissionDenied("motion");
        assert_eq!(e.to_string(), "permission to use the motion sensor was denied");
    }
}
