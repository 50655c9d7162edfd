//! Driver for the ThunderBorg dual motor controller over I2C.
//!
//! [`board::BoardSession`] is the entry point for commanding a board;
//! [`board::find_board`] and [`board::relocate_board`] handle discovery and
//! address changes. [`sim::SimBus`] stands in for real hardware.

pub mod board;
pub mod config;
pub mod messages;
pub mod runtime;
pub mod sim;
