//! Console message protocol definitions
//!
//! One JSON object per line in each direction, tagged by `type`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::alarm::AudioSource;
use crate::geo::Coordinate;
use crate::geofence::{Command, StatusSnapshot};
use crate::position::{now_ms, Fix, PositionError, PositionSample};

/// Kinds of position failure the host can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixErrorKind {
    PermissionDenied,
    Unavailable,
    Timeout,
}

/// Requests read from stdin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Pick the destination
    SetDestination { latitude: f64, longitude: f64 },

    /// Change the geofence radius (clamped to 50..=5000 m)
    SetRadius { meters: i64 },

    /// Choose the alarm sound; no path selects the default
    SetAudio {
        #[serde(default)]
        path: Option<PathBuf>,
    },

    Arm,

    Stop,

    /// Current status snapshot
    Status,

    /// A position fix from the platform
    Fix {
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        /// Defaults to the time the line is read
        #[serde(default)]
        timestamp_ms: Option<u64>,
    },

    /// A position failure from the platform
    FixError {
        kind: FixErrorKind,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Where a request goes
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Controller(Command),
    Feed(Fix),
}

impl Request {
    /// Validate the request and decide who handles it
    pub fn route(self) -> Result<Route, String> {
        let route = match self {
            Request::SetDestination {
                latitude,
                longitude,
            } => Route::Controller(Command::SetDestination(coordinate(latitude, longitude)?)),
            Request::SetRadius { meters } => Route::Controller(Command::SetRadius(meters)),
            Request::SetAudio { path } => Route::Controller(Command::SetAudio(
                path.map(AudioSource::File).unwrap_or_default(),
            )),
            Request::Arm => Route::Controller(Command::Arm),
            Request::Stop => Route::Controller(Command::Stop),
            Request::Status => Route::Controller(Command::Status),
            Request::Fix {
                latitude,
                longitude,
                accuracy,
                timestamp_ms,
            } => {
                if !accuracy.is_finite() || accuracy < 0.0 {
                    return Err(format!("invalid accuracy {accuracy}"));
                }
                Route::Feed(Ok(PositionSample {
                    coordinate: coordinate(latitude, longitude)?,
                    accuracy_m: accuracy,
                    timestamp_ms: timestamp_ms.unwrap_or_else(now_ms),
                }))
            }
            Request::FixError { kind, message } => {
                let error = match kind {
                    FixErrorKind::PermissionDenied => PositionError::PermissionDenied,
                    FixErrorKind::Unavailable => PositionError::PositionUnavailable(
                        message.unwrap_or_else(|| "no position source".to_string()),
                    ),
                    FixErrorKind::Timeout => PositionError::Timeout,
                };
                Route::Feed(Err(error))
            }
        };
        Ok(route)
    }
}

fn coordinate(latitude: f64, longitude: f64) -> Result<Coordinate, String> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("latitude {latitude} out of range"));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("longitude {longitude} out of range"));
    }
    Ok(Coordinate::new(latitude, longitude))
}

/// Responses written to stdout
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Snapshot after a controller command
    Status(StatusSnapshot),

    /// A fix was handed to the position feed
    FixQueued { subscribers: usize },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
