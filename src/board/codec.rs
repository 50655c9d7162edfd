// ThunderBorg command protocol
//
// Write frame: [command, payload...]
// Read frame:  [echoed command, data..., zero fill] (always 6 bytes)
//
// Everything in here is pure; the channel side lives in handle.rs.

use serde::{Deserialize, Serialize};

use super::error::{BoardError, Result};
use crate::config::READ_LEN;

/// Identifier byte the board reports in response to GET_ID
pub const BOARD_ID: u8 = 0x15;

/// PWM and colour channels are full scale at this value
pub const PWM_MAX: u8 = 0xFF;

/// Full-scale voltage of the analog monitoring pin
pub const VOLTAGE_PIN_MAX: f32 = 36.3;

/// Full-scale value of the 10-bit ADC
pub const ANALOG_MAX: u16 = 0x3FF;

/// Direction values reported in motor GET responses
pub const VALUE_FWD: u8 = 1;
pub const VALUE_REV: u8 = 2;

/// Flag values
pub const VALUE_OFF: u8 = 0;
pub const VALUE_ON: u8 = 1;

/// A complete response frame
pub type Frame = [u8; READ_LEN];

/// Command codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    SetLed1 = 1,
    GetLed1 = 2,
    SetLed2 = 3,
    GetLed2 = 4,
    SetLeds = 5,
    SetLedBattMon = 6,
    GetLedBattMon = 7,
    SetAFwd = 8,
    SetARev = 9,
    GetA = 10,
    SetBFwd = 11,
    SetBRev = 12,
    GetB = 13,
    AllOff = 14,
    GetDriveFaultA = 15,
    GetDriveFaultB = 16,
    SetAllFwd = 17,
    SetAllRev = 18,
    SetFailsafe = 19,
    GetFailsafe = 20,
    GetBattVolt = 21,
    SetBattLimits = 22,
    GetBattLimits = 23,
    WriteExternalLed = 24,
    GetId = 0x99,
    SetAddress = 0xAA,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, u8> {
        use Command::*;
        Ok(match code {
            1 => SetLed1,
            2 => GetLed1,
            3 => SetLed2,
            4 => GetLed2,
            5 => SetLeds,
            6 => SetLedBattMon,
            7 => GetLedBattMon,
            8 => SetAFwd,
            9 => SetARev,
            10 => GetA,
            11 => SetBFwd,
            12 => SetBRev,
            13 => GetB,
            14 => AllOff,
            15 => GetDriveFaultA,
            16 => GetDriveFaultB,
            17 => SetAllFwd,
            18 => SetAllRev,
            19 => SetFailsafe,
            20 => GetFailsafe,
            21 => GetBattVolt,
            22 => SetBattLimits,
            23 => GetBattLimits,
            24 => WriteExternalLed,
            0x99 => GetId,
            0xAA => SetAddress,
            other => return Err(other),
        })
    }
}

/// One of the two motor outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motor {
    One,
    Two,
}

impl Motor {
    pub const ALL: [Motor; 2] = [Motor::One, Motor::Two];

    pub fn forward(self) -> Command {
        match self {
            Motor::One => Command::SetAFwd,
            Motor::Two => Command::SetBFwd,
        }
    }

    pub fn reverse(self) -> Command {
        match self {
            Motor::One => Command::SetARev,
            Motor::Two => Command::SetBRev,
        }
    }

    pub fn get(self) -> Command {
        match self {
            Motor::One => Command::GetA,
            Motor::Two => Command::GetB,
        }
    }

    pub fn drive_fault(self) -> Command {
        match self {
            Motor::One => Command::GetDriveFaultA,
            Motor::Two => Command::GetDriveFaultB,
        }
    }
}

/// One of the two on-board RGB LEDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Led {
    One,
    Two,
}

impl Led {
    pub fn set(self) -> Command {
        match self {
            Led::One => Command::SetLed1,
            Led::Two => Command::SetLed2,
        }
    }

    pub fn get(self) -> Command {
        match self {
            Led::One => Command::GetLed1,
            Led::Two => Command::GetLed2,
        }
    }
}

/// Linear RGB colour, each channel in [0.0, 1.0]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const OFF: Color = Color::new(0.0, 0.0, 0.0);
    pub const BLUE: Color = Color::new(0.0, 0.0, 1.0);
    pub const PURPLE: Color = Color::new(1.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

/// Battery monitoring range used to colour the LEDs (volts)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryLimits {
    pub minimum: f32,
    pub maximum: f32,
}

/// Scale a normalized value to a byte, clamping out-of-range input
fn unit_to_byte(value: f32) -> u8 {
    (value * PWM_MAX as f32).round().clamp(0.0, PWM_MAX as f32) as u8
}

fn byte_to_unit(byte: u8) -> f32 {
    byte as f32 / PWM_MAX as f32
}

/// Encode a drive level in [-1, 1] as (direction command, PWM magnitude)
///
/// Zero (and negative zero) drives forward with zero magnitude.
pub fn encode_motor(motor: Motor, level: f32) -> (Command, u8) {
    let command = if level < 0.0 {
        motor.reverse()
    } else {
        motor.forward()
    };
    (command, unit_to_byte(level.abs()))
}

/// Encode one level for both motors (SET_ALL_FWD / SET_ALL_REV)
pub fn encode_both_motors(level: f32) -> (Command, u8) {
    let command = if level < 0.0 {
        Command::SetAllRev
    } else {
        Command::SetAllFwd
    };
    (command, unit_to_byte(level.abs()))
}

/// Decode a GET_A / GET_B frame into a signed drive level
pub fn decode_motor(motor: Motor, frame: &Frame) -> Result<f32> {
    let level = byte_to_unit(frame[2]);
    match frame[1] {
        VALUE_FWD => Ok(level),
        VALUE_REV => Ok(-level),
        value => Err(BoardError::UnexpectedDirection { motor, value }),
    }
}

pub fn encode_color(color: Color) -> [u8; 3] {
    [
        unit_to_byte(color.r),
        unit_to_byte(color.g),
        unit_to_byte(color.b),
    ]
}

/// Decode a GET_LED frame (bytes 1..=3 are r, g, b)
pub fn decode_color(frame: &Frame) -> Color {
    Color::new(
        byte_to_unit(frame[1]),
        byte_to_unit(frame[2]),
        byte_to_unit(frame[3]),
    )
}

/// Scale a battery limit in volts to the board's 8-bit representation
pub fn encode_voltage_limit(volts: f32) -> u8 {
    unit_to_byte(volts / VOLTAGE_PIN_MAX)
}

pub fn decode_voltage_limit(byte: u8) -> f32 {
    byte_to_unit(byte) * VOLTAGE_PIN_MAX
}

pub fn encode_battery_limits(limits: BatteryLimits) -> [u8; 2] {
    [
        encode_voltage_limit(limits.minimum),
        encode_voltage_limit(limits.maximum),
    ]
}

pub fn decode_battery_limits(frame: &Frame) -> BatteryLimits {
    BatteryLimits {
        minimum: decode_voltage_limit(frame[1]),
        maximum: decode_voltage_limit(frame[2]),
    }
}

/// Decode a GET_BATT_VOLT frame: 10-bit big-endian ADC reading
pub fn decode_voltage(frame: &Frame, correction: f32) -> f32 {
    let raw = ((frame[1] as u16) << 8) + frame[2] as u16;
    raw as f32 / ANALOG_MAX as f32 * VOLTAGE_PIN_MAX + correction
}

pub fn encode_bool(flag: bool) -> u8 {
    if flag { VALUE_ON } else { VALUE_OFF }
}

/// Any non-zero byte reads as set
pub fn decode_bool(byte: u8) -> bool {
    byte != VALUE_OFF
}

/// Build an APA102C / SK9822 LED word: full brightness, then BGR
pub fn external_led_word(color: Color) -> [u8; 4] {
    let [r, g, b] = encode_color(color);
    [PWM_MAX, b, g, r]
}

/// Build a write frame: command byte followed by its payload
pub fn build_frame(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + payload.len());
    frame.push(command.code());
    frame.extend_from_slice(payload);
    frame
}
