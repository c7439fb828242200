//! Audio route controller
//!
//! Handles transitions between Idle and ListeningForEarPosition based on
//! playback lifecycle events, and switches the output route whenever the
//! raised-to-ear detector reports a change during playback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::detector::{ListeningSession, RaisedToEarDetector};
use crate::events::RouteEvent;

use super::session::{AudioError, AudioRoute, AudioSession, SessionCategory, SessionMode};

/// The two states of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    /// No playback; sensors off, route left as last set
    #[default]
    Idle,
    /// Playback running; route follows the raised-to-ear state
    ListeningForEarPosition,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "Idle"),
            ControllerState::ListeningForEarPosition => write!(f, "ListeningForEarPosition"),
        }
    }
}

/// Applies routes; shared with the detector's change hook
struct RouteApplier {
    audio: Arc<dyn AudioSession>,
    playback_active: AtomicBool,
    /// Last route the audio session accepted
    last_applied: Mutex<Option<AudioRoute>>,
    event_tx: broadcast::Sender<RouteEvent>,
}

impl RouteApplier {
    fn handle_raised_change(&self, raised: bool) {
        let _ = self.event_tx.send(RouteEvent::RaisedToEarChanged { raised });
        self.apply(AudioRoute::for_raised(raised));
    }

    /// Switch to `route` unless idle or already there
    ///
    /// The comparison and the audio commands run under one lock so that
    /// concurrent callers cannot interleave.
    fn apply(&self, route: AudioRoute) {
        let mut last_applied = self.last_applied.lock();

        if !self.playback_active.load(Ordering::SeqCst) {
            debug!(%route, "playback inactive, route left unchanged");
            return;
        }
        if *last_applied == Some(route) {
            debug!(%route, "route already applied");
            return;
        }

        match self.issue(route) {
            Ok(()) => {
                info!(from = ?*last_applied, to = %route, "audio route applied");
                *last_applied = Some(route);
                let _ = self.event_tx.send(RouteEvent::RouteApplied { route });
            }
            Err(e) => {
                warn!(%e, %route, previous = ?*last_applied, "failed to apply audio route, keeping previous");
                let _ = self.event_tx.send(RouteEvent::RouteApplyFailed {
                    route,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn issue(&self, route: AudioRoute) -> Result<(), AudioError> {
        self.audio
            .set_category(SessionCategory::PlayAndRecord, SessionMode::Default)?;
        self.audio.override_output_port(route.port_override())
    }
}

struct Lifecycle {
    state: ControllerState,
    session: Option<ListeningSession>,
    /// Time when the current listening session started
    started_at: Option<Instant>,
}

/// Drives the output route from playback lifecycle and ear detection
pub struct AudioRouteController {
    detector: RaisedToEarDetector,
    applier: Arc<RouteApplier>,
    lifecycle: Mutex<Lifecycle>,
}

impl AudioRouteController {
    /// Create a new controller
    pub fn new(
        detector: RaisedToEarDetector,
        audio: Arc<dyn AudioSession>,
        event_tx: broadcast::Sender<RouteEvent>,
    ) -> Self {
        Self {
            detector,
            applier: Arc::new(RouteApplier {
                audio,
                playback_active: AtomicBool::new(false),
                last_applied: Mutex::new(None),
                event_tx,
            }),
            lifecycle: Mutex::new(Lifecycle {
                state: ControllerState::Idle,
                session: None,
                started_at: None,
            }),
        }
    }

    /// Get the current state
    pub fn state(&self) -> ControllerState {
        self.lifecycle.lock().state
    }

    /// Last route the audio session accepted
    pub fn current_route(&self) -> Option<AudioRoute> {
        *self.applier.last_applied.lock()
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<RouteEvent> {
        self.applier.event_tx.subscribe()
    }

    /// Playback began: activate the session and follow the ear position
    pub fn on_playback_started(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ControllerState::ListeningForEarPosition {
            debug!("playback already started, ignoring");
            return;
        }

        self.applier.playback_active.store(true, Ordering::SeqCst);
        if let Err(e) = self.applier.audio.set_active(true) {
            warn!(%e, "failed to activate audio session");
        }

        // A fresh session starts away from the ear. Applied before the
        // detector starts so a quick proximity edge cannot be overwritten.
        self.applier.apply(AudioRoute::Speaker);

        let applier = Arc::clone(&self.applier);
        let session = self
            .detector
            .listen(Arc::new(move |raised| applier.handle_raised_change(raised)));

        lifecycle.session = Some(session);
        lifecycle.started_at = Some(Instant::now());
        self.transition_to(&mut lifecycle, ControllerState::ListeningForEarPosition);
        let _ = self.applier.event_tx.send(RouteEvent::SessionStarted);
    }

    /// Playback ended: stop listening and release the audio session
    pub fn on_playback_finished(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ControllerState::Idle {
            debug!("playback finished while idle, ignoring");
            return;
        }

        if let Some(session) = lifecycle.session.take() {
            session.close();
        }
        self.applier.playback_active.store(false, Ordering::SeqCst);

        if let Err(e) = self.applier.audio.set_active(false) {
            warn!(%e, "failed to deactivate audio session");
        }

        let duration_ms = lifecycle
            .started_at
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.transition_to(&mut lifecycle, ControllerState::Idle);
        let _ = self
            .applier
            .event_tx
            .send(RouteEvent::SessionFinished { duration_ms });
    }

    fn transition_to(&self, lifecycle: &mut Lifecycle, new_state: ControllerState) {
        info!(
            from = %lifecycle.state,
            to = %new_state,
            "controller transition"
        );
        lifecycle.state = new_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::session::{AudioCommand, PortOverride, SimulatedAudioSession};
    use crate::sensors::{GravityVector, ReferenceFrame, SimulatedMotion, SimulatedProximity};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    const VERTICAL: GravityVector = GravityVector { x: 0.0, y: -0.9, z: 0.0 };

    struct Rig {
        proximity: Arc<SimulatedProximity>,
        motion: Arc<SimulatedMotion>,
        audio: Arc<SimulatedAudioSession>,
        controller: AudioRouteController,
        events: broadcast::Receiver<RouteEvent>,
    }

    fn create_controller() -> Rig {
        let proximity = Arc::new(SimulatedProximity::new());
        let motion = Arc::new(SimulatedMotion::manual());
        let audio = Arc::new(SimulatedAudioSession::new());
        let detector = RaisedToEarDetector::new(
            proximity.clone(),
            motion.clone(),
            Duration::from_millis(83),
            ReferenceFrame::XArbitraryZVertical,
        );
        let (tx, events) = broadcast::channel(64);
        let controller = AudioRouteController::new(detector, audio.clone(), tx);
        Rig {
            proximity,
            motion,
            audio,
            controller,
            events,
        }
    }

    impl Rig {
        fn raise(&self) {
            self.motion.emit(VERTICAL);
            self.proximity.emit(true);
        }

        fn drain(&mut self) -> Vec<RouteEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    #[test]
    fn test_initial_state() {
        let rig = create_controller();
        assert_eq!(rig.controller.state(), ControllerState::Idle);
        assert_eq!(rig.controller.current_route(), None);
    }

    #[test]
    fn test_playback_start_listens_on_speaker() {
        let rig = create_controller();
        rig.controller.on_playback_started();

        assert_eq!(rig.controller.state(), ControllerState::ListeningForEarPosition);
        assert_eq!(rig.controller.current_route(), Some(AudioRoute::Speaker));
        assert!(rig.audio.is_active());
        assert!(rig.proximity.is_monitoring());
        assert_eq!(
            rig.audio.commands(),
            vec![
                AudioCommand::SetActive(true),
                AudioCommand::SetCategory(SessionCategory::PlayAndRecord, SessionMode::Default),
                AudioCommand::OverrideOutputPort(PortOverride::Speaker),
            ]
        );
    }

    #[test]
    fn test_raise_routes_to_earpiece() {
        let mut rig = create_controller();
        rig.controller.on_playback_started();
        rig.drain();

        rig.raise();

        assert_eq!(rig.controller.current_route(), Some(AudioRoute::Earpiece));
        assert_eq!(rig.audio.current_route(), Some(AudioRoute::Earpiece));
        assert_eq!(
            rig.drain(),
            vec![
                RouteEvent::RaisedToEarChanged { raised: true },
                RouteEvent::RouteApplied {
                    route: AudioRoute::Earpiece
                },
            ]
        );
    }

    #[test]
    fn test_lowering_issues_speaker_once() {
        let rig = create_controller();
        rig.controller.on_playback_started();
        rig.raise();
        let before = rig.audio.overrides().len();

        rig.proximity.emit(false);
        rig.proximity.emit(false);

        assert_eq!(rig.audio.overrides()[before..], [PortOverride::Speaker]);
        assert_eq!(rig.controller.current_route(), Some(AudioRoute::Speaker));
    }

    #[test]
    fn test_repeated_near_no_redundant_commands() {
        let rig = create_controller();
        rig.controller.on_playback_started();
        rig.raise();
        rig.proximity.emit(true);
        rig.proximity.emit(true);

        assert_eq!(
            rig.audio.overrides(),
            vec![PortOverride::Speaker, PortOverride::None]
        );
    }

    #[test]
    fn test_double_start_is_noop() {
        let rig = create_controller();
        rig.controller.on_playback_started();
        rig.controller.on_playback_started();
        rig.raise();
        rig.proximity.emit(false);

        assert_eq!(
            rig.audio.overrides(),
            vec![PortOverride::Speaker, PortOverride::None, PortOverride::Speaker]
        );
    }

    #[test]
    fn test_finish_without_start_is_noop() {
        let rig = create_controller();
        rig.controller.on_playback_finished();

        assert_eq!(rig.controller.state(), ControllerState::Idle);
        assert!(rig.audio.commands().is_empty());
    }

    #[test]
    fn test_finish_stops_listening_and_deactivates() {
        let mut rig = create_controller();
        rig.controller.on_playback_started();
        rig.raise();
        rig.controller.on_playback_finished();

        assert_eq!(rig.controller.state(), ControllerState::Idle);
        assert!(!rig.audio.is_active());
        assert!(!rig.proximity.is_monitoring());
        assert!(matches!(
            rig.drain().last(),
            Some(RouteEvent::SessionFinished { .. })
        ));

        // Idle: sensor input changes nothing, route stays where it was
        let commands = rig.audio.commands().len();
        rig.proximity.emit(false);
        assert_eq!(rig.audio.commands().len(), commands);
        assert_eq!(rig.controller.current_route(), Some(AudioRoute::Earpiece));
    }

    #[test]
    fn test_new_session_returns_to_speaker() {
        let rig = create_controller();
        rig.controller.on_playback_started();
        rig.raise();
        rig.controller.on_playback_finished();

        rig.controller.on_playback_started();

        assert_eq!(rig.controller.current_route(), Some(AudioRoute::Speaker));
    }

    #[test]
    fn test_override_failure_keeps_previous_route() {
        let mut rig = create_controller();
        rig.controller.on_playback_started();
        rig.drain();

        rig.audio.set_fail_override(true);
        rig.raise();

        assert_eq!(rig.controller.current_route(), Some(AudioRoute::Speaker));
        assert_eq!(rig.audio.current_route(), Some(AudioRoute::Speaker));
        assert_eq!(rig.controller.state(), ControllerState::ListeningForEarPosition);
        assert!(matches!(
            rig.drain().last(),
            Some(RouteEvent::RouteApplyFailed {
                route: AudioRoute::Earpiece,
                ..
            })
        ));

        // Next transition retries
        rig.audio.set_fail_override(false);
        rig.proximity.emit(false);
        rig.proximity.emit(true);
        assert_eq!(rig.controller.current_route(), Some(AudioRoute::Earpiece));
    }

    #[test]
    fn test_category_failure_is_absorbed() {
        let rig = create_controller();
        rig.audio.set_fail_category(true);
        rig.controller.on_playback_started();

        assert_eq!(rig.controller.state(), ControllerState::ListeningForEarPosition);
        assert_eq!(rig.controller.current_route(), None);
        assert!(rig.audio.overrides().is_empty());
    }

    #[test]
    fn test_activation_failure_is_absorbed() {
        let rig = create_controller();
        rig.audio.set_fail_activation(true);
        rig.controller.on_playback_started();
        rig.controller.on_playback_finished();

        assert_eq!(rig.controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_concurrent_apply_issues_one_override() {
        for _ in 0..100 {
            let audio = Arc::new(SimulatedAudioSession::new());
            let (event_tx, _events) = broadcast::channel(256);
            let applier = Arc::new(RouteApplier {
                audio: audio.clone(),
                playback_active: AtomicBool::new(true),
                last_applied: Mutex::new(None),
                event_tx,
            });
            let start = Arc::new(Barrier::new(2));

            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let applier = Arc::clone(&applier);
                    let start = Arc::clone(&start);
                    thread::spawn(move || {
                        start.wait();
                        for _ in 0..50 {
                            applier.apply(AudioRoute::Earpiece);
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }

            assert_eq!(audio.overrides(), vec![PortOverride::None]);
            assert_eq!(*applier.last_applied.lock(), Some(AudioRoute::Earpiece));
        }
    }

    #[test]
    fn test_proximity_failure_returns_to_speaker() {
        let mut rig = create_controller();
        rig.controller.on_playback_started();
        rig.raise();
        rig.drain();

        rig.proximity.fail(crate::sensors::SensorError::Unavailable("proximity"));

        assert_eq!(rig.controller.current_route(), Some(AudioRoute::Speaker));
        assert_eq!(
            rig.drain(),
            vec![
                RouteEvent::RaisedToEarChanged { raised: false },
                RouteEvent::RouteApplied {
                    route: AudioRoute::Speaker
                },
            ]
        );
    }
}
