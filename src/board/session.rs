// High-level ThunderBorg session
//
// Owns exactly one BoardHandle. Construction probes the board with GET_ID
// and, when asked to, falls back to scanning the candidate buses. Once a
// session has failed it stays failed; every command then reports
// NotConnected.
//
// The protocol has no correlation id beyond the echoed command byte, so a
// session must only ever be driven from one caller at a time (`&mut self`
// on every command enforces this within a process).

use std::thread::sleep;

use tracing::{debug, error, info, warn};

use super::channel::ChannelProvider;
use super::codec::{
    self, BatteryLimits, Color, Command, Led, Motor, encode_battery_limits, encode_both_motors,
    encode_bool, encode_color, encode_motor, external_led_word,
};
use super::error::{BoardError, Result};
use super::handle::BoardHandle;
use super::locator;
use crate::config::{BATTERY_LIMITS_SETTLE, SessionConfig};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Probing,
    Connected,
    Failed,
    Closed,
}

pub struct BoardSession<P: ChannelProvider> {
    provider: P,
    config: SessionConfig,
    state: SessionState,
    handle: Option<BoardHandle<P::Channel>>,
}

impl<P: ChannelProvider> BoardSession<P> {
    /// Create an unconnected session; call [`connect`](Self::connect) next
    pub fn new(provider: P, config: SessionConfig) -> Self {
        Self {
            provider,
            config,
            state: SessionState::Uninitialized,
            handle: None,
        }
    }

    /// Create a session and connect it in one step
    pub fn open(provider: P, config: SessionConfig) -> Result<Self> {
        let mut session = Self::new(provider, config);
        session.connect()?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration in use; after auto-discovery it holds the located bus and address
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// (bus, address) of the connected board
    pub fn location(&self) -> Option<(u8, u8)> {
        self.handle.as_ref().map(|h| (h.bus(), h.address()))
    }

    /// Probe the configured board, falling back to discovery if enabled
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Connected => return Ok(()),
            SessionState::Probing | SessionState::Failed | SessionState::Closed => {
                return Err(BoardError::NotConnected);
            }
        }

        self.state = SessionState::Probing;
        match self.probe() {
            Ok(handle) => {
                self.config.bus = handle.bus();
                self.config.address = handle.address();
                self.handle = Some(handle);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                error!("ThunderBorg could not be found: {}", e);
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn probe(&self) -> Result<BoardHandle<P::Channel>> {
        let (bus, address) = (self.config.bus, self.config.address);
        debug!("Loading ThunderBorg on bus {} at address 0x{:02X}", bus, address);

        let mut handle = BoardHandle::open(&self.provider, bus, address)?;
        if handle.probe()? {
            return Ok(handle);
        }
        handle.close();

        if !self.config.auto_discover {
            return Err(BoardError::BoardNotFound {
                bus,
                address: Some(address),
            });
        }

        warn!(
            "No ThunderBorg on bus {} at 0x{:02X}, scanning for boards",
            bus, address
        );
        let buses = std::iter::once(bus)
            .chain(self.config.candidate_buses.iter().copied().filter(|&b| b != bus));
        for candidate in buses {
            let found = match locator::find_board(&self.provider, candidate) {
                Ok(found) => found,
                Err(e @ BoardError::Interrupted { .. }) => return Err(e),
                Err(e) => {
                    debug!("Skipping bus {}: {}", candidate, e);
                    continue;
                }
            };
            if let Some(&first) = found.first() {
                let mut handle = BoardHandle::open(&self.provider, candidate, first)?;
                if handle.probe()? {
                    info!(
                        "Using ThunderBorg on bus {} at address 0x{:02X}",
                        candidate, first
                    );
                    return Ok(handle);
                }
            }
        }

        Err(BoardError::BoardNotFound { bus, address: None })
    }

    fn handle(&mut self) -> Result<&mut BoardHandle<P::Channel>> {
        match (self.state, self.handle.as_mut()) {
            (SessionState::Connected, Some(handle)) => Ok(handle),
            _ => Err(BoardError::NotConnected),
        }
    }

    fn write(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        self.handle()?.write(command, payload).inspect_err(|e| {
            error!("Failed sending {:?}: {}", command, e);
        })
    }

    fn read(&mut self, command: Command) -> Result<codec::Frame> {
        self.handle()?.read(command).inspect_err(|e| {
            error!("Failed reading {:?}: {}", command, e);
        })
    }

    // === Motors ===

    /// Set a motor's drive level: -1.0 full reverse, 0.0 stop, 1.0 full forward
    pub fn set_motor(&mut self, motor: Motor, level: f32) -> Result<()> {
        let (command, pwm) = encode_motor(motor, level);
        debug!("Motor {:?} level {} -> {:?} pwm {}", motor, level, command, pwm);
        self.write(command, &[pwm])
    }

    /// Set both motors to the same level in a single command
    pub fn set_both_motors(&mut self, level: f32) -> Result<()> {
        let (command, pwm) = encode_both_motors(level);
        self.write(command, &[pwm])
    }

    pub fn get_motor(&mut self, motor: Motor) -> Result<f32> {
        let frame = self.read(motor.get())?;
        codec::decode_motor(motor, &frame).inspect_err(|e| error!("{}", e))
    }

    /// Stop both motors
    pub fn halt_motors(&mut self) -> Result<()> {
        self.write(Command::AllOff, &[0])?;
        debug!("Both motors halted");
        Ok(())
    }

    /// Read the drive fault flag (short circuit, under voltage, ...)
    pub fn get_drive_fault(&mut self, motor: Motor) -> Result<bool> {
        let frame = self.read(motor.drive_fault())?;
        Ok(codec::decode_bool(frame[1]))
    }

    // === LEDs ===

    pub fn set_led(&mut self, led: Led, color: Color) -> Result<()> {
        self.write(led.set(), &encode_color(color))
    }

    pub fn get_led(&mut self, led: Led) -> Result<Color> {
        let frame = self.read(led.get())?;
        Ok(codec::decode_color(&frame))
    }

    pub fn set_both_leds(&mut self, color: Color) -> Result<()> {
        self.write(Command::SetLeds, &encode_color(color))
    }

    /// Let the LEDs show battery level (red at the minimum limit, green at the maximum)
    pub fn set_led_battery_monitor(&mut self, enabled: bool) -> Result<()> {
        self.write(Command::SetLedBattMon, &[encode_bool(enabled)])
    }

    pub fn get_led_battery_monitor(&mut self) -> Result<bool> {
        let frame = self.read(Command::GetLedBattMon)?;
        Ok(codec::decode_bool(frame[1]))
    }

    // === Failsafe ===

    /// When enabled the board stops the motors unless a command arrives every 250 ms
    pub fn set_comms_failsafe(&mut self, enabled: bool) -> Result<()> {
        self.write(Command::SetFailsafe, &[encode_bool(enabled)])
    }

    pub fn get_comms_failsafe(&mut self) -> Result<bool> {
        let frame = self.read(Command::GetFailsafe)?;
        Ok(codec::decode_bool(frame[1]))
    }

    // === Battery ===

    pub fn get_battery_voltage(&mut self) -> Result<f32> {
        let frame = self.read(Command::GetBattVolt)?;
        Ok(codec::decode_voltage(&frame, self.config.voltage_correction))
    }

    /// Store new monitoring limits in the board's EEPROM
    ///
    /// Blocks for the EEPROM settling delay before returning.
    pub fn set_battery_limits(&mut self, minimum: f32, maximum: f32) -> Result<()> {
        let limits = BatteryLimits { minimum, maximum };
        self.write(Command::SetBattLimits, &encode_battery_limits(limits))?;
        debug!(
            "Battery limits {:.2} V / {:.2} V written, waiting for EEPROM",
            minimum, maximum
        );
        sleep(BATTERY_LIMITS_SETTLE);
        Ok(())
    }

    pub fn get_battery_limits(&mut self) -> Result<BatteryLimits> {
        let frame = self.read(Command::GetBattLimits)?;
        Ok(codec::decode_battery_limits(&frame))
    }

    // === External LED chain (SK9822 / APA102C) ===

    /// Send one raw 32-bit word down the LED chain, MSB first from `b0`
    pub fn write_external_led_word(&mut self, b0: u8, b1: u8, b2: u8, b3: u8) -> Result<()> {
        self.write(Command::WriteExternalLed, &[b0, b1, b2, b3])
    }

    /// Set every LED in the chain, in order, after a start frame
    pub fn set_external_led_colors(&mut self, colors: &[Color]) -> Result<()> {
        self.write_external_led_word(0, 0, 0, 0)?;
        for &color in colors {
            let [b0, b1, b2, b3] = external_led_word(color);
            self.write_external_led_word(b0, b1, b2, b3)?;
        }
        Ok(())
    }

    /// Close the channel; further commands report NotConnected
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
            info!("ThunderBorg session closed");
        }
        if self.state == SessionState::Connected {
            self.state = SessionState::Closed;
        }
    }
}
