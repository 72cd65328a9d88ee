//! Geofence controller
//!
//! Handles transitions between Idle, Armed and Triggered based on UI
//! commands and position samples. All mutation happens on the task that
//! drives [`Controller::run`], one input at a time.

use std::time::Instant;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::alarm::{Alarm, AudioSource};
use crate::events::AlarmEvent;
use crate::geo::{Coordinate, DistanceFormula};
use crate::position::{
    now_ms, PositionError, PositionSample, PositionSource, SubscriptionHandle, SubscriptionId,
    WatchOptions, MAX_CLOCK_SKEW,
};
use crate::prefs::PreferenceStore;

pub const MIN_RADIUS_M: u32 = 50;
pub const MAX_RADIUS_M: u32 = 5000;
pub const DEFAULT_RADIUS_M: u32 = 500;

const RADIUS_KEY: &str = "radius";

/// Arming state of the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmState {
    /// Not monitoring
    #[default]
    Idle,
    /// Monitoring, waiting for the first inside-radius sample
    Armed,
    /// Arrived; the alarm is sounding until stopped
    Triggered,
}

impl std::fmt::Display for ArmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArmState::Idle => write!(f, "Idle"),
            ArmState::Armed => write!(f, "Armed"),
            ArmState::Triggered => write!(f, "Triggered"),
        }
    }
}

/// Clamp a requested radius into the supported range
pub fn clamp_radius(meters: i64) -> u32 {
    meters.clamp(MIN_RADIUS_M as i64, MAX_RADIUS_M as i64) as u32
}

/// Destination and radius of the geofence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceConfig {
    pub destination: Option<Coordinate>,
    pub radius_m: u32,
}

impl GeofenceConfig {
    pub fn contains(&self, distance_m: f64) -> bool {
        distance_m <= self.radius_m as f64
    }
}

/// Fixed policy the controller runs with
#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    /// Options for the position subscription; `max_staleness` is also
    /// enforced here on every sample
    pub watch: WatchOptions,
    pub formula: DistanceFormula,
}

/// Precondition failures of [`Controller::arm`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArmError {
    #[error("pick a destination first")]
    NoDestination,

    #[error("position updates are not supported on this device")]
    Unsupported,
}

impl ArmError {
    pub fn code(&self) -> &'static str {
        match self {
            ArmError::NoDestination => "no_destination",
            ArmError::Unsupported => "unsupported",
        }
    }
}

/// Operations the UI can invoke
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetDestination(Coordinate),
    SetRadius(i64),
    SetAudio(AudioSource),
    Arm,
    Stop,
    Status,
}

/// Everything the controller's event loop consumes
#[derive(Debug)]
pub enum ControllerInput {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<StatusSnapshot, ArmError>>,
    },
    Sample {
        subscription: SubscriptionId,
        sample: PositionSample,
    },
    SampleError {
        subscription: SubscriptionId,
        error: PositionError,
    },
}

/// Observable fields, as read by the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: ArmState,
    pub destination: Option<Coordinate>,
    pub radius_m: u32,
    pub distance_m: Option<f64>,
    pub inside: bool,
    pub gps_status: String,
    pub audio: String,
}

/// The geofence controller
pub struct Controller {
    state: ArmState,
    config: GeofenceConfig,
    settings: Settings,
    audio_source: AudioSource,
    /// Last accepted sample of the current session
    last_sample: Option<PositionSample>,
    distance_m: Option<f64>,
    inside: bool,
    gps_status: String,
    armed_at: Option<Instant>,
    subscription: Option<SubscriptionHandle>,
    positions: Option<Box<dyn PositionSource>>,
    alarm: Box<dyn Alarm>,
    prefs: Box<dyn PreferenceStore>,
    event_tx: broadcast::Sender<AlarmEvent>,
    /// Handed to position subscriptions so samples land in our queue
    input_tx: mpsc::Sender<ControllerInput>,
}

impl Controller {
    /// Create a controller. `positions` is `None` when the device has no
    /// position stream.
    pub fn new(
        settings: Settings,
        positions: Option<Box<dyn PositionSource>>,
        alarm: Box<dyn Alarm>,
        prefs: Box<dyn PreferenceStore>,
        event_tx: broadcast::Sender<AlarmEvent>,
        input_tx: mpsc::Sender<ControllerInput>,
    ) -> Self {
        let radius_m = prefs
            .get(RADIUS_KEY)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(clamp_radius)
            .unwrap_or(DEFAULT_RADIUS_M);

        Self {
            state: ArmState::Idle,
            config: GeofenceConfig {
                destination: None,
                radius_m,
            },
            settings,
            audio_source: AudioSource::Default,
            last_sample: None,
            distance_m: None,
            inside: false,
            gps_status: "Not started".to_string(),
            armed_at: None,
            subscription: None,
            positions,
            alarm,
            prefs,
            event_tx,
            input_tx,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ArmState {
        self.state
    }

    #[cfg(test)]
    pub fn config(&self) -> GeofenceConfig {
        self.config
    }

    #[cfg(test)]
    pub fn distance_m(&self) -> Option<f64> {
        self.distance_m
    }

    #[cfg(test)]
    pub fn is_inside(&self) -> bool {
        self.inside
    }

    #[cfg(test)]
    pub fn gps_status(&self) -> &str {
        &self.gps_status
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            destination: self.config.destination,
            radius_m: self.config.radius_m,
            distance_m: self.distance_m,
            inside: self.inside,
            gps_status: self.gps_status.clone(),
            audio: self.audio_source.to_string(),
        }
    }

    /// Process inputs until the queue closes
    pub async fn run(&mut self, mut input_rx: mpsc::Receiver<ControllerInput>) {
        info!(
            radius_m = self.config.radius_m,
            "geofence controller started in Idle state"
        );

        while let Some(input) = input_rx.recv().await {
            self.handle_input(input);
        }

        info!("geofence controller stopped");
    }

    /// Stop everything and consume the controller
    pub fn dispose(mut self) {
        self.stop();
        info!("geofence controller disposed");
    }

    fn handle_input(&mut self, input: ControllerInput) {
        match input {
            ControllerInput::Command { command, reply } => {
                let result = self.handle_command(command);
                if reply.send(result).is_err() {
                    debug!("command issuer went away before the reply");
                }
            }
            ControllerInput::Sample {
                subscription,
                sample,
            } => {
                if self.is_current(subscription) {
                    self.on_sample(sample);
                } else {
                    debug!(%subscription, "dropping sample from cancelled subscription");
                }
            }
            ControllerInput::SampleError {
                subscription,
                error,
            } => {
                if self.is_current(subscription) {
                    self.on_sample_error(error);
                } else {
                    debug!(%subscription, "dropping error from cancelled subscription");
                }
            }
        }
    }

    pub fn handle_command(&mut self, command: Command) -> Result<StatusSnapshot, ArmError> {
        debug!(?command, "handling command");
        match command {
            Command::SetDestination(coordinate) => self.set_destination(coordinate),
            Command::SetRadius(meters) => self.set_radius(meters),
            Command::SetAudio(source) => self.set_audio_source(source),
            Command::Arm => self.arm()?,
            Command::Stop => self.stop(),
            Command::Status => {}
        }
        Ok(self.snapshot())
    }

    fn is_current(&self, subscription: SubscriptionId) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|handle| handle.id == subscription)
    }

    pub fn set_destination(&mut self, coordinate: Coordinate) {
        info!(%coordinate, "destination set");
        self.config.destination = Some(coordinate);
        self.emit(AlarmEvent::DestinationSet {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
        });
    }

    /// Set and persist the radius, then re-evaluate the last fresh sample
    pub fn set_radius(&mut self, meters: i64) {
        let radius_m = clamp_radius(meters);
        if radius_m as i64 != meters {
            debug!(requested = meters, radius_m, "radius clamped");
        }

        self.config.radius_m = radius_m;
        if let Err(e) = self.prefs.set(RADIUS_KEY, &radius_m.to_string()) {
            warn!(?e, "failed to persist radius");
        }
        self.emit(AlarmEvent::RadiusChanged { meters: radius_m });

        if let Some(sample) = self.last_sample {
            if sample.is_current(now_ms(), self.settings.watch.max_staleness) {
                self.evaluate(sample);
            } else {
                debug!("last sample too old to re-evaluate");
            }
        }
    }

    /// Choose what the alarm plays on the next trigger
    pub fn set_audio_source(&mut self, source: AudioSource) {
        info!(%source, "alarm sound selected");
        self.audio_source = source;
    }

    /// Start monitoring. No-op if already armed or triggered.
    pub fn arm(&mut self) -> Result<(), ArmError> {
        if self.state != ArmState::Idle {
            debug!(state = %self.state, "arm ignored, already monitoring");
            return Ok(());
        }

        if self.config.destination.is_none() {
            return Err(ArmError::NoDestination);
        }
        let Some(positions) = self.positions.as_mut() else {
            return Err(ArmError::Unsupported);
        };

        if let Some(previous) = self.subscription.take() {
            positions.unsubscribe(previous);
        }
        let handle = positions.subscribe(self.settings.watch, self.input_tx.clone());
        debug!(subscription = %handle.id, "subscribed to position stream");
        self.subscription = Some(handle);

        self.last_sample = None;
        self.distance_m = None;
        self.inside = false;
        self.gps_status = "Starting…".to_string();
        self.alarm.keep_awake();

        self.transition_to(ArmState::Armed);
        Ok(())
    }

    /// Handle a sample from the position stream
    pub fn on_sample(&mut self, sample: PositionSample) {
        self.on_sample_at(sample, now_ms());
    }

    fn on_sample_at(&mut self, sample: PositionSample, now_ms: u64) {
        if self.state == ArmState::Idle {
            debug!("ignoring sample while idle");
            return;
        }

        let age = sample.age(now_ms);
        if age > self.settings.watch.max_staleness {
            debug!(age_ms = age.as_millis() as u64, "ignoring stale sample");
            return;
        }
        let lead = sample.lead(now_ms);
        if lead > MAX_CLOCK_SKEW {
            debug!(lead_ms = lead.as_millis() as u64, "ignoring future-stamped sample");
            return;
        }
        if let Some(last) = self.last_sample {
            if sample.timestamp_ms < last.timestamp_ms {
                debug!("ignoring out-of-order sample");
                return;
            }
        }

        self.gps_status = format!("OK (±{} m)", sample.accuracy_m.round() as i64);
        self.last_sample = Some(sample);
        self.evaluate(sample);
    }

    /// Handle an error from the position stream. Never changes the state.
    pub fn on_sample_error(&mut self, error: PositionError) {
        let needs_attention = matches!(error, PositionError::PermissionDenied);
        if needs_attention {
            error!(%error, "position stream error, alarm cannot fire");
        } else {
            warn!(%error, "position stream error");
        }

        self.gps_status = match &error {
            PositionError::PermissionDenied => {
                "Location permission denied: allow location access, then stop and re-arm"
                    .to_string()
            }
            PositionError::PositionUnavailable(reason) => {
                format!("Position unavailable: {reason}")
            }
            PositionError::Timeout => "Waiting for GPS fix (timed out, retrying)".to_string(),
        };

        self.emit(AlarmEvent::GpsStatus {
            text: self.gps_status.clone(),
            needs_attention,
        });
    }

    /// Stop monitoring and silence the alarm. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(handle) = self.subscription.take() {
            debug!(subscription = %handle.id, "unsubscribing from position stream");
            if let Some(positions) = self.positions.as_mut() {
                positions.unsubscribe(handle);
            }
        }

        self.inside = false;
        self.last_sample = None;

        if self.state != ArmState::Idle {
            self.alarm.stop();
            self.transition_to(ArmState::Idle);
        }
    }

    /// Measure the sample against the geofence; may trigger
    fn evaluate(&mut self, sample: PositionSample) {
        let Some(destination) = self.config.destination else {
            return;
        };

        let distance_m = self.settings.formula.distance(sample.coordinate, destination);
        let inside = self.config.contains(distance_m);
        self.distance_m = Some(distance_m);
        self.inside = inside;

        debug!(
            distance_m = distance_m.round(),
            radius_m = self.config.radius_m,
            inside,
            "position evaluated"
        );
        self.emit(AlarmEvent::PositionUpdated {
            distance_m,
            inside,
            accuracy_m: sample.accuracy_m,
        });

        if self.state == ArmState::Armed && inside {
            info!(
                distance_m = distance_m.round(),
                radius_m = self.config.radius_m,
                "arrived inside geofence"
            );
            self.alarm.start(&self.audio_source);
            self.transition_to(ArmState::Triggered);
        }
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: ArmState) {
        let old_state = self.state;
        let elapsed_ms = self
            .armed_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        info!(
            from = %old_state,
            to = %new_state,
            elapsed_ms,
            "state transition"
        );

        self.state = new_state;
        let event = match new_state {
            ArmState::Armed => {
                self.armed_at = Some(Instant::now());
                AlarmEvent::Armed
            }
            ArmState::Triggered => AlarmEvent::Triggered {
                distance_m: self.distance_m.unwrap_or_default(),
                armed_ms: elapsed_ms,
            },
            ArmState::Idle => {
                self.armed_at = None;
                AlarmEvent::Stopped {
                    duration_ms: elapsed_ms,
                }
            }
        };

        self.emit(event);
    }

    fn emit(&self, event: AlarmEvent) {
        debug!(%event, "emitting event");
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }
}
