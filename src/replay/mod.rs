//! Replay module for feeding sensor and playback input to the daemon

mod driver;
mod protocol;

pub use driver::Replay;
