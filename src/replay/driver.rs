//! Replay driver feeding recorded input into the daemon
//!
//! Sensor input goes to the delivery thread; playback lifecycle calls go
//! straight to the controller from this task, which plays the role of the
//! playback owner. Before every playback, audio or wait step the sensor
//! queue is flushed so the two paths observe input in file order.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::route::{AudioRouteController, SimulatedAudioSession};
use crate::sensors::{GravityVector, SensorError, SensorInput};

use super::protocol::{parse_line, AudioOperation, InputEvent};

/// Counts reported when the input is exhausted
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: u64,
    pub skipped: u64,
}

/// Reads input events and dispatches them
pub struct Replay {
    sensor_tx: mpsc::Sender<SensorInput>,
    controller: Arc<AudioRouteController>,
    audio: Arc<SimulatedAudioSession>,
}

impl Replay {
    pub fn new(
        sensor_tx: mpsc::Sender<SensorInput>,
        controller: Arc<AudioRouteController>,
        audio: Arc<SimulatedAudioSession>,
    ) -> Self {
        Self {
            sensor_tx,
            controller,
            audio,
        }
    }

    /// Replay from a file, or from stdin when no path is given
    pub async fn run_from(&self, input: Option<&Path>) -> Result<ReplayStats> {
        match input {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("failed to open replay input {}", path.display()))?;
                info!(?path, "replaying input file");
                self.run(file).await
            }
            None => {
                info!("replaying input from stdin");
                self.run(tokio::io::stdin()).await
            }
        }
    }

    /// Replay every line of `reader` until end of input
    pub async fn run<R: AsyncRead + Unpin>(&self, reader: R) -> Result<ReplayStats> {
        let mut lines = BufReader::new(reader).lines();
        let mut stats = ReplayStats::default();
        let mut line_no = 0u64;

        while let Some(line) = lines
            .next_line()
            .await
            .context("failed to read replay input")?
        {
            line_no += 1;
            match parse_line(&line) {
                Ok(Some(event)) => {
                    self.apply(event).await?;
                    stats.applied += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(line = line_no, %e, "skipping malformed input");
                    stats.skipped += 1;
                }
            }
        }

        // Let queued sensor input land before reporting completion
        self.flush().await?;
        info!(
            applied = stats.applied,
            skipped = stats.skipped,
            "replay input exhausted"
        );
        Ok(stats)
    }

    async fn apply(&self, event: InputEvent) -> Result<()> {
        debug!(?event, "replaying input");

        match event {
            InputEvent::Proximity { near } => self.send(SensorInput::Proximity(near)).await,
            InputEvent::Orientation { x, y, z } => {
                self.send(SensorInput::Orientation(GravityVector::new(x, y, z)))
                    .await
            }
            InputEvent::SensorFault { sensor, fault } => {
                self.send(SensorInput::Fault { sensor, fault }).await
            }
            InputEvent::AudioFault { operation, failing } => {
                self.flush().await?;
                match operation {
                    AudioOperation::Category => self.audio.set_fail_category(failing),
                    AudioOperation::Override => self.audio.set_fail_override(failing),
                    AudioOperation::Activation => self.audio.set_fail_activation(failing),
                }
                Ok(())
            }
            InputEvent::PlaybackStarted => {
                self.flush().await?;
                self.controller.on_playback_started();
                Ok(())
            }
            InputEvent::PlaybackFinished => {
                self.flush().await?;
                self.controller.on_playback_finished();
                Ok(())
            }
            InputEvent::Wait { ms } => {
                self.flush().await?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
        }
    }

    async fn send(&self, input: SensorInput) -> Result<()> {
        self.sensor_tx
            .send(input)
            .await
            .map_err(|_| SensorError::DeliveryClosed)?;
        Ok(())
    }

    /// Wait until the delivery thread has handled everything sent so far
    async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(SensorInput::Barrier(ack_tx)).await?;
        ack_rx.await.map_err(|_| SensorError::DeliveryClosed)?;
        Ok(())
    }
}
