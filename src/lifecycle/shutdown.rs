//! Signals that end a replay early

use std::fmt;
use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::debug;

/// Which signal asked the daemon to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Terminate,
    Interrupt,
    Hangup,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// SIGTERM, SIGINT and SIGHUP listeners, registered up front
///
/// Once installed the default handlers are replaced for the rest of the
/// process, so a signal arriving before [`ShutdownSignal::recv`] is polled
/// is not lost.
pub struct ShutdownSignal {
    terminate: Signal,
    interrupt: Signal,
    hangup: Signal,
}

impl ShutdownSignal {
    /// Register the listeners; must be called inside the tokio runtime
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next shutdown signal
    pub async fn recv(&mut self) -> ShutdownReason {
        let reason = tokio::select! {
            _ = self.terminate.recv() => ShutdownReason::Terminate,
            _ = self.interrupt.recv() => ShutdownReason::Interrupt,
            _ = self.hangup.recv() => ShutdownReason::Hangup,
        };
        debug!(%reason, "received shutdown signal");
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        assert_eq!(ShutdownReason::Terminate.to_string(), "SIGTERM");
        assert_eq!(ShutdownReason::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownReason::Hangup.to_string(), "SIGHUP");
    }

    #[tokio::test]
    async fn test_install_inside_runtime() {
        assert!(ShutdownSignal::install().is_ok());
    }
}
