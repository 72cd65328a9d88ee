//! Geofence module for arrival detection
//!
//! Provides an explicit state machine with three states:
//! - Idle: not monitoring
//! - Armed: subscribed to positions, waiting to arrive
//! - Triggered: arrived, alarm sounding until stopped

mod controller;

pub use controller::{Command, Controller, ControllerInput, Settings, StatusSnapshot};

#[cfg(test)]
pub use controller::{ArmError, ArmState};
