//! Simulated proximity and motion sensors
//!
//! Stand-ins for platform sensors. Samples and proximity edges are pushed
//! in from outside (the replay driver or tests) and delivered to whichever
//! handler is currently subscribed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    GravityVector, MotionSensor, OrientationHandler, OrientationSample, ProximityHandler,
    ProximitySensor, ReferenceFrame, SensorError,
};

/// Proximity sensor driven by [`SimulatedProximity::emit`]
pub struct SimulatedProximity {
    /// Set once the sensor stops working
    fault: Mutex<Option<SensorError>>,
    monitoring: AtomicBool,
    handler: Mutex<Option<ProximityHandler>>,
}

impl SimulatedProximity {
    pub fn new() -> Self {
        Self {
            fault: Mutex::new(None),
            monitoring: AtomicBool::new(false),
            handler: Mutex::new(None),
        }
    }

    /// Mark the sensor as missing; subsequent enable calls fail
    #[cfg(test)]
    pub fn set_available(&self, available: bool) {
        *self.fault.lock() = (!available).then_some(SensorError::Unavailable("proximity"));
    }

    /// Grant or deny access to the sensor
    #[cfg(test)]
    pub fn set_permission(&self, granted: bool) {
        *self.fault.lock() = (!granted).then_some(SensorError::PermissionDenied("proximity"));
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn has_subscriber(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Report a proximity change; dropped while monitoring is off
    pub fn emit(&self, near: bool) {
        if !self.is_monitoring() {
            debug!(near, "proximity event dropped, monitoring disabled");
            return;
        }
        self.notify(Ok(near));
    }

    /// Stop working with `error`
    ///
    /// A monitoring subscriber is told once; monitoring turns off and later
    /// enable calls fail with the same error.
    pub fn fail(&self, error: SensorError) {
        *self.fault.lock() = Some(error.clone());
        if !self.monitoring.swap(false, Ordering::SeqCst) {
            debug!(%error, "proximity failed while not monitoring");
            return;
        }
        self.notify(Err(error));
    }

    fn notify(&self, reading: Result<bool, SensorError>) {
        // Clone out so the handler runs without holding our lock
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(reading);
        }
    }

    fn check(&self) -> Result<(), SensorError> {
        match &*self.fault.lock() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Default for SimulatedProximity {
    fn default() -> Self {
        Self::new()
    }
}

impl ProximitySensor for SimulatedProximity {
    fn set_monitoring_enabled(&self, enabled: bool) -> Result<(), SensorError> {
        if enabled {
            self.check()?;
        }
        self.monitoring.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, handler: ProximityHandler) -> Result<(), SensorError> {
        self.check()?;
        *self.handler.lock() = Some(handler);
        Ok(())
    }

    fn unsubscribe(&self) {
        self.handler.lock().take();
    }
}

/// Motion sensor that reports the most recently set pose
///
/// In manual mode samples are delivered only through [`SimulatedMotion::emit`].
/// In sampled mode a background thread re-delivers the current pose at the
/// interval requested by `start_updates`, the way a hardware attitude
/// sensor reports continuously.
pub struct SimulatedMotion {
    sampled: bool,
    /// Set once the sensor stops working
    fault: Mutex<Option<SensorError>>,
    /// Samples are delivered while this is held, so they land in the
    /// order the poses were set
    pose: Arc<Mutex<GravityVector>>,
    handler: Mutex<Option<OrientationHandler>>,
    /// Stop flag of the current sampler thread
    sampler: Mutex<Option<Arc<AtomicBool>>>,
    interval: Mutex<Option<Duration>>,
}

impl SimulatedMotion {
    /// Sensor that only delivers explicitly emitted samples
    #[cfg(test)]
    pub fn manual() -> Self {
        Self::build(false)
    }

    /// Sensor that samples the current pose on its own thread
    pub fn sampled() -> Self {
        Self::build(true)
    }

    fn build(sampled: bool) -> Self {
        Self {
            sampled,
            fault: Mutex::new(None),
            // Flat on a table until told otherwise
            pose: Arc::new(Mutex::new(GravityVector::new(0.0, 0.0, -1.0))),
            handler: Mutex::new(None),
            sampler: Mutex::new(None),
            interval: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn set_available(&self, available: bool) {
        *self.fault.lock() = (!available).then_some(SensorError::Unavailable("motion"));
    }

    #[cfg(test)]
    pub fn set_permission(&self, granted: bool) {
        *self.fault.lock() = (!granted).then_some(SensorError::PermissionDenied("motion"));
    }

    /// Interval requested by the current subscriber, if updating
    #[cfg(test)]
    pub fn update_interval(&self) -> Option<Duration> {
        *self.interval.lock()
    }

    #[cfg(test)]
    pub fn is_updating(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Update the pose reported by the sampler thread
    #[cfg(test)]
    pub fn set_pose(&self, gravity: GravityVector) {
        *self.pose.lock() = gravity;
    }

    /// Deliver one sample immediately and remember it as the current pose
    pub fn emit(&self, gravity: GravityVector) {
        let mut pose = self.pose.lock();
        if self.fault.lock().is_some() {
            debug!("orientation sample dropped, motion sensor failed");
            return;
        }
        *pose = gravity;
        self.deliver(Ok(OrientationSample::now(gravity)));
    }

    /// Stop working with `error`
    ///
    /// Sampling stops and the subscriber receives the error as the last
    /// thing it hears from this sensor.
    pub fn fail(&self, error: SensorError) {
        *self.fault.lock() = Some(error.clone());
        self.stop_sampler();
        self.deliver(Err(error));
    }

    fn deliver(&self, sample: Result<OrientationSample, SensorError>) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(sample);
        }
    }

    fn check(&self) -> Result<(), SensorError> {
        match &*self.fault.lock() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn spawn_sampler(&self, interval: Duration, handler: OrientationHandler) -> Result<(), SensorError> {
        self.stop_sampler();

        let running = Arc::new(AtomicBool::new(true));
        let pose = Arc::clone(&self.pose);
        let stop_flag = Arc::clone(&running);

        thread::Builder::new()
            .name("motion-sampler".to_string())
            .spawn(move || {
                info!(?interval, "motion sampler started");
                loop {
                    {
                        let pose = pose.lock();
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        handler(Ok(OrientationSample::now(*pose)));
                    }
                    thread::sleep(interval);
                }
                info!("motion sampler stopped");
            })
            .map_err(|e| {
                warn!(?e, "failed to spawn motion sampler");
                SensorError::Unavailable("motion")
            })?;

        *self.sampler.lock() = Some(stop_flag);
        Ok(())
    }

    /// Signal the sampler thread to exit; no sample is delivered after this
    /// returns
    fn stop_sampler(&self) {
        if let Some(running) = self.sampler.lock().take() {
            // Waits out a sample in flight
            let _pose = self.pose.lock();
            running.store(false, Ordering::SeqCst);
        }
    }
}

impl MotionSensor for SimulatedMotion {
    fn start_updates(
        &self,
        interval: Duration,
        frame: ReferenceFrame,
        handler: OrientationHandler,
    ) -> Result<(), SensorError> {
        self.check()?;

        debug!(?interval, ?frame, "motion updates requested");
        *self.handler.lock() = Some(Arc::clone(&handler));
        *self.interval.lock() = Some(interval);

        if self.sampled {
            self.spawn_sampler(interval, handler)?;
        }
        Ok(())
    }

    fn stop_updates(&self) {
        self.handler.lock().take();
        self.stop_sampler();
        if let Some(interval) = self.interval.lock().take() {
            debug!(?interval, "motion updates stopped");
        }
    }
}

impl Drop for SimulatedMotion {
    fn drop(&mut self) {
        self.stop_updates();
    }
}
