//! Events module for route controller transitions
//!
//! Provides structured event types for listening-session lifecycle,
//! raised-to-ear changes, and audio route commands.

use serde::{Deserialize, Serialize};

use crate::route::AudioRoute;

/// Events emitted by the route controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteEvent {
    /// Playback started, listening for ear position
    SessionStarted,

    /// Playback finished, detector stopped
    SessionFinished {
        /// Duration in milliseconds that the session was active
        duration_ms: u64,
    },

    /// Raised-to-ear state flipped
    RaisedToEarChanged { raised: bool },

    /// Output route switched
    RouteApplied { route: AudioRoute },

    /// Output route could not be switched; the previous one stays in effect
    RouteApplyFailed {
        route: AudioRoute,
        reason: String,
    },
}

impl std::fmt::Display for RouteEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteEvent::SessionStarted => write!(f, "SESSION_STARTED"),
            RouteEvent::SessionFinished { duration_ms } => {
                write!(f, "SESSION_FINISHED ({}ms)", duration_ms)
            }
            RouteEvent::RaisedToEarChanged { raised } => {
                write!(f, "RAISED_TO_EAR_CHANGED ({})", raised)
            }
            RouteEvent::RouteApplied { route } => write!(f, "ROUTE_APPLIED ({})", route),
            RouteEvent::RouteApplyFailed { route, reason } => {
                write!(f, "ROUTE_APPLY_FAILED ({}: {})", route, reason)
            }
        }
    }
}
