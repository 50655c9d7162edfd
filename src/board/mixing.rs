// Skid-steer mixing for a two-motor ThunderBorg chassis
// Converts a throttle/turn pair into per-motor drive levels.

use crate::messages::{DriveCommand, MotorLevels};

/// Turn inputs inside this band are treated as straight ahead
const TURN_DEADBAND: f32 = 0.05;

/// Mixer settings
#[derive(Debug, Clone, Copy)]
pub struct Mixer {
    /// Cap on the level sent to the board, from supply vs. motor voltage
    pub max_power: f32,
    /// Scale applied to `turn` unless a spin turn is requested
    pub turn_speed: f32,
    /// Scale applied to both sides in slow mode
    pub slow_speed: f32,
}

impl Default for Mixer {
    fn default() -> Self {
        Self {
            max_power: 1.0,
            turn_speed: 0.5,
            slow_speed: 0.5,
        }
    }
}

impl Mixer {
    /// Limit output so motors rated for `motor_volts` are not overdriven by `supply_volts`
    pub fn for_voltages(supply_volts: f32, motor_volts: f32) -> Self {
        Self {
            max_power: max_power(supply_volts, motor_volts),
            ..Self::default()
        }
    }

    /// Mix one command into motor levels in [-max_power, max_power]
    pub fn mix(&self, cmd: &DriveCommand) -> MotorLevels {
        let throttle = cmd.throttle.clamp(-1.0, 1.0);
        let mut turn = cmd.turn.clamp(-1.0, 1.0);
        if !cmd.spin {
            turn *= self.turn_speed;
        }

        let mut one = throttle;
        let mut two = throttle;
        if turn > TURN_DEADBAND {
            one *= 1.0 - 2.0 * turn;
        } else if turn < -TURN_DEADBAND {
            two *= 1.0 + 2.0 * turn;
        }

        if cmd.slow {
            one *= self.slow_speed;
            two *= self.slow_speed;
        }

        MotorLevels::new(one * self.max_power, two * self.max_power)
    }
}

/// Ratio of motor voltage to supply voltage, capped at 1.0
pub fn max_power(supply_volts: f32, motor_volts: f32) -> f32 {
    if supply_volts <= 0.0 || motor_volts >= supply_volts {
        1.0
    } else {
        motor_volts / supply_volts
    }
}
