//! Raised-to-ear detection
//!
//! Fuses proximity edges with the latest vertical-hold classification
//! into one edge-triggered boolean. Only proximity events re-evaluate the
//! fused state; orientation samples merely update the gate that the next
//! proximity event reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::sensors::{
    MotionSensor, OrientationSample, ProximitySensor, ReferenceFrame, SensorError,
};

use super::orientation::OrientationClassifier;

/// Callback invoked with the new raised-to-ear value
///
/// Runs synchronously on the sensor delivery thread while the detector's
/// fusion lock is held. It must not start or stop the detector that
/// invoked it.
pub type ChangeHook = Arc<dyn Fn(bool) + Send + Sync + 'static>;

/// Mutable fusion state guarded by one lock
struct Fusion {
    raised: bool,
    hook: Option<ChangeHook>,
}

/// State shared with sensor callbacks
struct Shared {
    classifier: OrientationClassifier,
    listening: AtomicBool,
    /// Lock-free mirror of `Fusion::raised` for readers
    raised: AtomicBool,
    fusion: Mutex<Fusion>,
}

impl Shared {
    fn new() -> Self {
        Self {
            classifier: OrientationClassifier::new(),
            listening: AtomicBool::new(false),
            raised: AtomicBool::new(false),
            fusion: Mutex::new(Fusion {
                raised: false,
                hook: None,
            }),
        }
    }

    fn handle_proximity_change(&self, reading: Result<bool, SensorError>) {
        let mut fusion = self.fusion.lock();
        // Checked under the lock so nothing slips in after stop_listening
        if !self.listening.load(Ordering::SeqCst) {
            debug!(?reading, "proximity change ignored, not listening");
            return;
        }

        match reading {
            Ok(near) => {
                let vertical = self.classifier.is_vertical();
                debug!(near, vertical, "proximity changed");
                self.set_raised(&mut fusion, near && vertical);
            }
            Err(e) => {
                warn!(%e, "proximity lost, assuming away from ear");
                self.set_raised(&mut fusion, false);
            }
        }
    }

    fn handle_orientation(&self, sample: Result<OrientationSample, SensorError>) {
        if self.listening.load(Ordering::SeqCst) {
            self.classifier.observe(sample);
        }
    }

    /// Store the fused value and notify only when it changed
    fn set_raised(&self, fusion: &mut Fusion, raised: bool) {
        if fusion.raised == raised {
            return;
        }

        fusion.raised = raised;
        self.raised.store(raised, Ordering::Release);
        info!(raised, "raised-to-ear state changed");

        if let Some(hook) = &fusion.hook {
            hook(raised);
        }
    }

    /// Forget everything from a previous session without notifying
    fn reset(&self, fusion: &mut Fusion) {
        fusion.raised = false;
        self.raised.store(false, Ordering::Release);
        self.classifier.reset();
    }
}

struct DetectorCore {
    proximity: Arc<dyn ProximitySensor>,
    motion: Arc<dyn MotionSensor>,
    sample_interval: Duration,
    frame: ReferenceFrame,
    shared: Arc<Shared>,
    /// Serializes start/stop against each other
    lifecycle: Mutex<()>,
}

impl DetectorCore {
    fn start(&self) {
        let _lifecycle = self.lifecycle.lock();

        {
            let mut fusion = self.shared.fusion.lock();
            if self.shared.listening.load(Ordering::SeqCst) {
                debug!("already listening for ear position");
                return;
            }
            self.shared.reset(&mut fusion);
            self.shared.listening.store(true, Ordering::SeqCst);
        }

        let shared = Arc::clone(&self.shared);
        let subscribed = self
            .proximity
            .subscribe(Arc::new(move |reading| shared.handle_proximity_change(reading)))
            .and_then(|()| self.proximity.set_monitoring_enabled(true));
        if let Err(e) = subscribed {
            warn!(%e, "proximity monitoring unavailable, raised-to-ear stays false");
            self.proximity.unsubscribe();
        }

        let shared = Arc::clone(&self.shared);
        let started = self.motion.start_updates(
            self.sample_interval,
            self.frame,
            Arc::new(move |sample| shared.handle_orientation(sample)),
        );
        if let Err(e) = started {
            warn!(%e, "orientation updates unavailable, vertical hold stays false");
        }

        info!(interval = ?self.sample_interval, "listening for ear position");
    }

    fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();

        let was_listening = {
            let mut fusion = self.shared.fusion.lock();
            fusion.hook = None;
            self.shared.listening.swap(false, Ordering::SeqCst)
        };
        if !was_listening {
            return;
        }

        if let Err(e) = self.proximity.set_monitoring_enabled(false) {
            debug!(%e, "failed to disable proximity monitoring");
        }
        self.proximity.unsubscribe();
        self.motion.stop_updates();

        info!("stopped listening for ear position");
    }
}

impl Drop for DetectorCore {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Detects when the device is held up to the ear
///
/// Cloning yields another handle to the same detector. Listening stops
/// automatically when the last handle is dropped.
#[derive(Clone)]
pub struct RaisedToEarDetector {
    core: Arc<DetectorCore>,
}

impl RaisedToEarDetector {
    pub fn new(
        proximity: Arc<dyn ProximitySensor>,
        motion: Arc<dyn MotionSensor>,
        sample_interval: Duration,
        frame: ReferenceFrame,
    ) -> Self {
        Self {
            core: Arc::new(DetectorCore {
                proximity,
                motion,
                sample_interval,
                frame,
                shared: Arc::new(Shared::new()),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    pub fn is_raised_to_ear(&self) -> bool {
        self.core.shared.raised.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn is_listening(&self) -> bool {
        self.core.shared.listening.load(Ordering::SeqCst)
    }

    /// Install the change hook, replacing any previous one
    pub fn set_on_change(&self, hook: ChangeHook) {
        self.core.shared.fusion.lock().hook = Some(hook);
    }

    /// Enable proximity monitoring and orientation sampling
    ///
    /// Starting an already listening detector does nothing. Sensor
    /// failures are logged and leave the detector reporting not raised.
    pub fn start_listening(&self) {
        self.core.start();
    }

    /// Disable both sensors and clear the change hook
    ///
    /// No hook invocation begins after this returns.
    pub fn stop_listening(&self) {
        self.core.stop();
    }

    /// Install `hook`, start listening, and stop again when the returned
    /// session is closed or dropped
    pub fn listen(&self, hook: ChangeHook) -> ListeningSession {
        self.set_on_change(hook);
        self.start_listening();
        ListeningSession {
            detector: self.clone(),
            closed: false,
        }
    }
}

/// Scope guard for one listening session
pub struct ListeningSession {
    detector: RaisedToEarDetector,
    closed: bool,
}

impl ListeningSession {
    /// Stop listening now instead of at drop
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.closed {
            self.closed = true;
            self.detector.stop_listening();
        }
    }
}

impl Drop for ListeningSession {
    fn drop(&mut self) {
        self.finish();
    }
}
