//! Events module for geofence transitions
//!
//! Structured events published by the controller whenever its observable
//! state changes. The host prints them as JSON lines.

use serde::{Deserialize, Serialize};

/// Events emitted by the geofence controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlarmEvent {
    /// A destination was picked
    DestinationSet { latitude: f64, longitude: f64 },

    /// The geofence radius changed (already clamped)
    RadiusChanged { meters: u32 },

    /// Monitoring started
    Armed,

    /// A fresh sample was evaluated against the geofence
    PositionUpdated {
        distance_m: f64,
        inside: bool,
        accuracy_m: f64,
    },

    /// The GPS status line changed because of a stream error
    GpsStatus {
        text: String,
        /// True when the user must act (e.g. grant permission)
        needs_attention: bool,
    },

    /// Arrived inside the geofence; the alarm is sounding
    Triggered {
        distance_m: f64,
        /// Milliseconds between arming and arrival
        armed_ms: u64,
    },

    /// Monitoring stopped and the alarm silenced
    Stopped {
        /// Milliseconds the session was active
        duration_ms: u64,
    },
}

impl std::fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmEvent::DestinationSet {
                latitude,
                longitude,
            } => write!(f, "DESTINATION_SET ({latitude:.6}, {longitude:.6})"),
            AlarmEvent::RadiusChanged { meters } => write!(f, "RADIUS_CHANGED ({meters} m)"),
            AlarmEvent::Armed => write!(f, "ARMED"),
            AlarmEvent::PositionUpdated {
                distance_m, inside, ..
            } => write!(
                f,
                "POSITION_UPDATED ({:.0} m, inside: {})",
                distance_m,
                if *inside { "Yes" } else { "No" }
            ),
            AlarmEvent::GpsStatus { text, .. } => write!(f, "GPS_STATUS ({text})"),
            AlarmEvent::Triggered { distance_m, .. } => {
                write!(f, "TRIGGERED ({distance_m:.0} m)")
            }
            AlarmEvent::Stopped { duration_ms } => write!(f, "STOPPED ({duration_ms}ms)"),
        }
    }
}
