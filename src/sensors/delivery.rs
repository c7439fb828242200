//! Background delivery of sensor input
//!
//! Sensor callbacks must not run on the playback control task. This
//! module owns a dedicated thread that receives raw sensor input over a
//! channel and hands it to the simulated sensors, which in turn invoke
//! their subscribers on this thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{
    FaultKind, GravityVector, SensorError, SensorKind, SimulatedMotion, SimulatedProximity,
};

/// Raw input destined for one of the sensors
#[derive(Debug)]
pub enum SensorInput {
    /// Proximity sensor changed state
    Proximity(bool),
    /// New gravity reading
    Orientation(GravityVector),
    /// Sensor stopped working
    Fault { sensor: SensorKind, fault: FaultKind },
    /// Acknowledged once everything queued before it has been delivered
    Barrier(oneshot::Sender<()>),
}

/// Delivers sensor input on a dedicated thread
pub struct SensorDelivery {
    proximity: Arc<SimulatedProximity>,
    motion: Arc<SimulatedMotion>,
    running: Arc<AtomicBool>,
}

impl SensorDelivery {
    pub fn new(proximity: Arc<SimulatedProximity>, motion: Arc<SimulatedMotion>) -> Self {
        Self {
            proximity,
            motion,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the delivery thread
    ///
    /// The thread runs until `stop()` is called or every sender for
    /// `input_rx` has been dropped.
    pub fn start(&self, mut input_rx: mpsc::Receiver<SensorInput>) -> Result<(), SensorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SensorError::AlreadyRunning);
        }

        let proximity = Arc::clone(&self.proximity);
        let motion = Arc::clone(&self.motion);
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("sensor-delivery".to_string())
            .spawn(move || {
                info!("sensor delivery thread started");

                while let Some(input) = input_rx.blocking_recv() {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    dispatch(&proximity, &motion, input);
                }

                running.store(false, Ordering::SeqCst);
                info!("sensor delivery thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SensorError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Stop delivering; input still queued is discarded
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn dispatch(proximity: &SimulatedProximity, motion: &SimulatedMotion, input: SensorInput) {
    match input {
        SensorInput::Proximity(near) => {
            debug!(near, "delivering proximity change");
            proximity.emit(near);
        }
        SensorInput::Orientation(gravity) => {
            motion.emit(gravity);
        }
        SensorInput::Fault { sensor, fault } => {
            let error = fault.error(sensor);
            warn!(sensor = sensor.as_str(), %error, "sensor fault");
            match sensor {
                SensorKind::Proximity => proximity.fail(error),
                SensorKind::Motion => motion.fail(error),
            }
        }
        SensorInput::Barrier(ack) => {
            let _ = ack.send(());
        }
    }
}
