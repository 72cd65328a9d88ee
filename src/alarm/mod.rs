//! Alarm module
//!
//! The actuator that sounds the alarm on arrival, and the device
//! capabilities it drives.

mod actuator;
mod devices;

pub use actuator::{Actuator, Alarm};
pub use devices::{AudioSource, CommandPlayer, InhibitLock, TerminalBell};
