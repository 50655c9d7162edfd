// Bus addresses, protocol timings, runtime rates
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Character device for an I2C bus, keyed by bus number
pub const DEVICE_PATH_PREFIX: &str = "/dev/i2c-";

// Rev 2 boards sit on bus 1, rev 1 boards on bus 0
pub const DEFAULT_BUS: u8 = 1;
pub const CANDIDATE_BUSES: [u8; 2] = [0, 1];

// Factory address, also the value the board reports for GET_ID
pub const DEFAULT_ADDRESS: u8 = 0x15;

// Valid 7-bit range for discovery and relocation
pub const ADDRESS_MIN: u8 = 0x03;
pub const ADDRESS_MAX: u8 = 0x77;

// Every defined command answers with exactly this many bytes
pub const READ_LEN: usize = 6;

// Write-then-read attempts before a read is given up
pub const READ_ATTEMPTS: usize = 3;

// EEPROM commit time after writing battery limits
pub const BATTERY_LIMITS_SETTLE: Duration = Duration::from_millis(200);

// EEPROM commit time after moving the board to a new address
pub const ADDRESS_SETTLE: Duration = Duration::from_millis(100);

// Board-side watchdog window when the comms failsafe is on
pub const FAILSAFE_WINDOW: Duration = Duration::from_millis(250);

// Factory battery monitoring limits (volts)
pub const BATTERY_MIN_DEFAULT: f32 = 7.0;
pub const BATTERY_MAX_DEFAULT: f32 = 35.0;

// Drive runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for the drive runtime watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

/// How a [`BoardSession`](crate::board::BoardSession) finds its board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub bus: u8,
    pub address: u8,
    /// Scan the candidate buses when nothing answers at `bus`/`address`
    pub auto_discover: bool,
    pub candidate_buses: Vec<u8>,
    /// Added to every battery voltage reading
    pub voltage_correction: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bus: DEFAULT_BUS,
            address: DEFAULT_ADDRESS,
            auto_discover: false,
            candidate_buses: CANDIDATE_BUSES.to_vec(),
            voltage_correction: 0.0,
        }
    }
}

impl SessionConfig {
    pub fn new(bus: u8, address: u8) -> Self {
        Self {
            bus,
            address,
            ..Self::default()
        }
    }

    pub fn with_auto_discover(mut self, enabled: bool) -> Self {
        self.auto_discover = enabled;
        self
    }

    /// Parse a JSON config document; missing fields fall back to defaults
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json(r#"{"address": 112, "auto_discover": true}"#).unwrap();
        assert_eq!(config.address, 0x70);
        assert_eq!(config.bus, DEFAULT_BUS);
        assert!(config.auto_discover);
        assert_eq!(config.candidate_buses, vec![0, 1]);
        assert_eq!(config.voltage_correction, 0.0);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(SessionConfig::from_json("{}").unwrap(), SessionConfig::default());
    }
}
