//! Console module for the line-based UI surface
//!
//! Stands in for the map UI: commands and platform position fixes arrive
//! as JSON lines on stdin, responses and events leave on stdout.

mod protocol;
mod reader;

pub use reader::{write_line, ConsoleReader};
