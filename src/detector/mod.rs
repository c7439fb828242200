//! Raised-to-ear detection
//!
//! Combines two independently timed sensor streams:
//! - Orientation: sampled continuously, classified as vertical hold or not
//! - Proximity: discrete near/far edges that trigger re-evaluation
//!
//! The fused state only changes on proximity edges and notifies its
//! single change hook when it does.

mod orientation;
mod raised;

pub use raised::{ListeningSession, RaisedToEarDetector};
