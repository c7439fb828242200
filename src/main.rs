//! ear-route-daemon: raise-to-ear audio route switching
//!
//! This daemon fuses a proximity sensor with device orientation to decide
//! whether the phone is held to the ear, and switches playback between
//! the earpiece and the loudspeaker accordingly:
//! - Orientation classification (upright call pose) from gravity samples
//! - Edge-triggered raised-to-ear detection on proximity changes
//! - Explicit route controller driven by the playback lifecycle
//!
//! Sensor and playback input is replayed as JSON lines from stdin or a
//! file; route events are written to stdout as JSON lines.

mod config;
mod detector;
mod events;
mod lifecycle;
mod replay;
mod route;
mod sensors;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::detector::RaisedToEarDetector;
use crate::events::RouteEvent;
use crate::lifecycle::ShutdownSignal;
use crate::replay::Replay;
use crate::route::{AudioRouteController, AudioSession, ControllerState, SimulatedAudioSession};
use crate::sensors::{SensorDelivery, SimulatedMotion, SimulatedProximity};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the event stream
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "ear-route-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    info!(
        sample_interval = ?config.sample_interval,
        input = ?config.input,
        "configuration loaded"
    );

    // Register signal listeners before any input is read
    let mut shutdown =
        ShutdownSignal::install().context("failed to register shutdown signal handlers")?;

    // Sensors and audio subsystem
    let proximity = Arc::new(SimulatedProximity::new());
    let motion = Arc::new(SimulatedMotion::sampled());
    let audio = Arc::new(SimulatedAudioSession::new());

    // Replay -> sensor delivery thread
    let (sensor_tx, sensor_rx) = mpsc::channel(config.event_capacity);
    // Route controller -> event writer
    let (event_tx, _event_rx) = broadcast::channel::<RouteEvent>(config.event_capacity);

    let detector = RaisedToEarDetector::new(
        proximity.clone(),
        motion.clone(),
        config.sample_interval,
        config.reference_frame,
    );
    let controller = Arc::new(AudioRouteController::new(
        detector.clone(),
        audio.clone(),
        event_tx.clone(),
    ));

    // Start sensor delivery (runs on dedicated thread)
    let delivery = SensorDelivery::new(proximity, motion);
    match delivery.start(sensor_rx) {
        Ok(()) => {
            info!("sensor delivery started");
        }
        Err(e) => {
            error!(?e, "failed to start sensor delivery");
            warn!("continuing without sensor input - route stays on speaker");
        }
    }

    let mut output_rx = controller.subscribe();
    let replay = Replay::new(sensor_tx, Arc::clone(&controller), Arc::clone(&audio));

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Feed input until it runs out
        result = replay.run_from(config.input.as_deref()) => {
            match result {
                Ok(stats) => info!(applied = stats.applied, skipped = stats.skipped, "replay finished"),
                Err(e) => error!(?e, "replay failed"),
            }
        }

        // Write route events as they happen
        _ = write_events(&mut output_rx) => {
            info!("event writer exited");
        }

        // Wait for shutdown signal
        reason = shutdown.recv() => {
            info!(%reason, "shutdown signal received");
        }
    }

    // Cleanup
    info!(
        state = %controller.state(),
        raised = detector.is_raised_to_ear(),
        "shutting down..."
    );

    if controller.state() == ControllerState::ListeningForEarPosition {
        warn!("input ended during playback, finishing session");
        controller.on_playback_finished();
    }
    delivery.stop();

    // Flush events produced while shutting down
    let mut stdout = tokio::io::stdout();
    while let Ok(event) = output_rx.try_recv() {
        write_event(&mut stdout, &event).await?;
    }
    stdout.flush().await?;

    info!(
        commands = audio.commands().len(),
        route = ?controller.current_route(),
        device_route = ?audio.current_route(),
        session_active = audio.is_active(),
        "ear-route-daemon stopped"
    );

    Ok(())
}

/// Write every route event to stdout until the channel closes
async fn write_events(events: &mut broadcast::Receiver<RouteEvent>) {
    let mut stdout = tokio::io::stdout();
    loop {
        match events.recv().await {
            Ok(event) => {
                info!(%event, "route event");
                if let Err(e) = write_event(&mut stdout, &event).await {
                    error!(?e, "failed to write route event");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "route event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                break;
            }
        }
    }
}

async fn write_event(stdout: &mut tokio::io::Stdout, event: &RouteEvent) -> Result<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}
