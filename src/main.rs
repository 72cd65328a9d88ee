//! geofence-alarm: location-triggered alarm daemon
//!
//! Watches the device position and sounds an alarm (looping audio,
//! repeating vibration, optional wake lock) once the user enters a circle
//! around the chosen destination.
//!
//! The daemon provides:
//! - An explicit Idle / Armed / Triggered state machine
//! - A position feed with bounded staleness and per-fix timeouts
//! - A JSON line console for commands, fixes and events
//!
//! Map rendering and destination search live in the UI, not here.

mod alarm;
mod config;
mod console;
mod events;
mod geo;
mod geofence;
mod lifecycle;
mod position;
mod prefs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alarm::{Actuator, CommandPlayer, InhibitLock, TerminalBell};
use crate::config::Config;
use crate::console::{write_line, ConsoleReader};
use crate::events::AlarmEvent;
use crate::geofence::{Controller, ControllerInput, Settings};
use crate::lifecycle::ShutdownSignal;
use crate::position::FeedSource;
use crate::prefs::FilePreferences;

/// How long to wait for a first fix before giving up on initial centering
const INITIAL_FIX_TIMEOUT: Duration = Duration::from_secs(8);

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the console protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "geofence-alarm starting"
    );

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.data_dir,
        keep_awake = config.keep_awake,
        formula = ?config.distance_formula,
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new()?;

    // Host (console, position feed) -> controller
    let (input_tx, input_rx) = mpsc::channel::<ControllerInput>(64);
    // Controller -> stdout
    let (event_tx, mut event_rx) = broadcast::channel::<AlarmEvent>(64);

    let positions = FeedSource::new(32);
    let feed = positions.feed();

    let actuator = Actuator::new(
        Box::new(CommandPlayer::new(
            config.player.clone(),
            config.alarm_sound.clone(),
        )),
        Arc::new(TerminalBell),
        Box::new(InhibitLock::default()),
        config.keep_awake,
    );

    let settings = Settings {
        watch: config.watch_options(),
        formula: config.distance_formula,
    };
    let mut controller = Controller::new(
        settings,
        Some(Box::new(positions)),
        Box::new(actuator),
        Box::new(FilePreferences::open(&config.prefs_path())),
        event_tx,
        input_tx.clone(),
    );

    // Initial centering only needs a single fix
    let centering = feed.clone();
    tokio::spawn(async move {
        match centering.get_once(INITIAL_FIX_TIMEOUT).await {
            Ok(sample) => info!(
                coordinate = %sample.coordinate,
                accuracy_m = sample.accuracy_m,
                "initial position"
            ),
            Err(e) => info!(error = %e, "no initial position"),
        }
    });

    let console = ConsoleReader::new(input_tx, feed);
    match console.start() {
        Ok(()) => {
            info!("console reader started");
        }
        Err(e) => {
            error!(?e, "failed to start console reader");
            warn!("continuing without console input");
        }
    }

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Process commands and position samples
        _ = controller.run(input_rx) => {
            info!("controller exited");
        }

        // Print controller events as JSON lines
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "alarm event");
                        write_line(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event printer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("event printer exited");
        }

        _ = console.closed() => {
            info!("console input closed");
        }

        signal = shutdown.wait() => {
            info!(signal, "shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    console.stop();
    controller.dispose();

    while let Ok(event) = event_rx.try_recv() {
        write_line(&event);
    }

    info!("geofence-alarm stopped");

    Ok(())
}
