//! Route module for earpiece/speaker selection
//!
//! Provides an explicit controller with two states:
//! - Idle: no playback, sensors off
//! - ListeningForEarPosition: playback running, route follows the ear

mod controller;
mod session;

pub use controller::{AudioRouteController, ControllerState};
pub use session::{AudioRoute, AudioSession, SimulatedAudioSession};
