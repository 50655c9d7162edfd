// Message types exchanged with the drive runtime

use serde::{Deserialize, Serialize};

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriveCommand {
    /// Forward/back in [-1, 1]
    pub throttle: f32,
    /// Right (positive) / left (negative) in [-1, 1]
    pub turn: f32,
    /// Use the full turn rate instead of the gentler default
    pub spin: bool,
    /// Halve output for fine manoeuvring
    pub slow: bool,
}

// Levels sent to the two motor outputs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MotorLevels {
    pub one: f32,
    pub two: f32,
}

impl MotorLevels {
    pub fn new(one: f32, two: f32) -> Self {
        Self { one, two }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Health reported by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    DriveFault,
}
