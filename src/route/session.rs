//! Audio session collaborator
//!
//! The controller never talks to a process-wide audio singleton. It is
//! handed an `AudioSession` and issues category, activation and output
//! port commands through it.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Physical output path for playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioRoute {
    /// Receiver at the top of the device, used when held to the ear
    Earpiece,
    /// Loudspeaker
    Speaker,
}

impl AudioRoute {
    /// Route that should be active for the given raised-to-ear state
    pub fn for_raised(raised: bool) -> Self {
        if raised {
            Self::Earpiece
        } else {
            Self::Speaker
        }
    }

    /// Port override that selects this route under play-and-record
    pub fn port_override(&self) -> PortOverride {
        match self {
            // The default output for play-and-record is the receiver
            AudioRoute::Earpiece => PortOverride::None,
            AudioRoute::Speaker => PortOverride::Speaker,
        }
    }
}

impl std::fmt::Display for AudioRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioRoute::Earpiece => write!(f, "earpiece"),
            AudioRoute::Speaker => write!(f, "speaker"),
        }
    }
}

/// Audio session category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCategory {
    PlayAndRecord,
}

/// Audio session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Default,
}

/// Explicit output port override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOverride {
    /// Use the category's default output
    None,
    /// Force the loudspeaker
    Speaker,
}

/// Audio subsystem collaborator
pub trait AudioSession: Send + Sync {
    fn set_category(&self, category: SessionCategory, mode: SessionMode) -> Result<(), AudioError>;

    /// Activate or deactivate the session; deactivation lets other audio
    /// clients resume
    fn set_active(&self, active: bool) -> Result<(), AudioError>;

    fn override_output_port(&self, port: PortOverride) -> Result<(), AudioError>;

    /// Route currently in effect, if the session has been configured
    fn current_route(&self) -> Option<AudioRoute>;
}

/// Errors reported by the audio subsystem
#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioError {
    #[error("audio session rejected category: {0}")]
    CategoryRejected(String),

    #[error("audio session rejected output override: {0}")]
    OverrideRejected(String),

    #[error("failed to change audio session activation: {0}")]
    ActivationFailed(String),
}

/// A command received by [`SimulatedAudioSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCommand {
    SetCategory(SessionCategory, SessionMode),
    SetActive(bool),
    OverrideOutputPort(PortOverride),
}

#[derive(Debug, Default)]
struct SessionState {
    category: Option<SessionCategory>,
    port: Option<PortOverride>,
    active: bool,
    commands: Vec<AudioCommand>,
}

/// Audio session that logs and records every command
///
/// Individual operations can be made to fail to exercise the controller's
/// best-effort routing.
#[derive(Debug, Default)]
pub struct SimulatedAudioSession {
    state: Mutex<SessionState>,
    fail_category: AtomicBool,
    fail_override: AtomicBool,
    fail_activation: AtomicBool,
}

impl SimulatedAudioSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_category(&self, fail: bool) {
        self.fail_category.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_override(&self, fail: bool) {
        self.fail_override.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_activation(&self, fail: bool) {
        self.fail_activation.store(fail, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Every command accepted so far, in order
    pub fn commands(&self) -> Vec<AudioCommand> {
        self.state.lock().commands.clone()
    }

    /// Output overrides accepted so far, in order
    #[cfg(test)]
    pub fn overrides(&self) -> Vec<PortOverride> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                AudioCommand::OverrideOutputPort(port) => Some(*port),
                _ => None,
            })
            .collect()
    }
}

impl AudioSession for SimulatedAudioSession {
    fn set_category(&self, category: SessionCategory, mode: SessionMode) -> Result<(), AudioError> {
        if self.fail_category.load(Ordering::SeqCst) {
            return Err(AudioError::CategoryRejected(format!("{category:?}/{mode:?}")));
        }
        let mut state = self.state.lock();
        state.category = Some(category);
        state.commands.push(AudioCommand::SetCategory(category, mode));
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<(), AudioError> {
        if self.fail_activation.load(Ordering::SeqCst) {
            return Err(AudioError::ActivationFailed(format!("active={active}")));
        }
        let mut state = self.state.lock();
        state.active = active;
        state.commands.push(AudioCommand::SetActive(active));
        if active {
            info!("audio session activated");
        } else {
            info!("audio session deactivated, notifying other audio clients");
        }
        Ok(())
    }

    fn override_output_port(&self, port: PortOverride) -> Result<(), AudioError> {
        if self.fail_override.load(Ordering::SeqCst) {
            return Err(AudioError::OverrideRejected(format!("{port:?}")));
        }
        let mut state = self.state.lock();
        state.port = Some(port);
        state.commands.push(AudioCommand::OverrideOutputPort(port));
        info!(?port, "output port override applied");
        Ok(())
    }

    fn current_route(&self) -> Option<AudioRoute> {
        let state = self.state.lock();
        match (state.category, state.port) {
            (Some(SessionCategory::PlayAndRecord), Some(PortOverride::Speaker)) => {
                Some(AudioRoute::Speaker)
            }
            (Some(SessionCategory::PlayAndRecord), Some(PortOverride::None)) => {
                Some(AudioRoute::Earpiece)
            }
            _ => None,
        }
    }
}
