// In-memory ThunderBorg boards on simulated buses
//
// Models the board side of the protocol closely enough to exercise the
// session and locator without hardware: GET commands stage a 6-byte
// response for the next read, the comms failsafe zeros both motors when
// no write arrives within the window, and SET_ADDRESS moves the board.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::debug;

use crate::board::channel::{ByteChannel, ChannelProvider};
use crate::board::codec::{
    ANALOG_MAX, BOARD_ID, Command, Frame, Motor, VALUE_FWD, VALUE_REV, VOLTAGE_PIN_MAX,
    encode_battery_limits, encode_bool,
};
use crate::board::BatteryLimits;
use crate::config::{BATTERY_MAX_DEFAULT, BATTERY_MIN_DEFAULT, FAILSAFE_WINDOW, READ_LEN};

/// State of one simulated device
#[derive(Debug, Clone)]
struct SimBoard {
    id: u8,
    writes: usize,
    // (direction value, pwm)
    motors: [(u8, u8); 2],
    leds: [[u8; 3]; 2],
    led_battery_monitor: bool,
    failsafe: bool,
    drive_faults: [bool; 2],
    battery_raw: u16,
    limits: [u8; 2],
    external_leds: Vec<[u8; 4]>,
    last_write: Instant,
    pending: Option<Frame>,
}

impl SimBoard {
    fn new(id: u8) -> Self {
        Self {
            id,
            writes: 0,
            motors: [(VALUE_FWD, 0); 2],
            leds: [[0; 3]; 2],
            led_battery_monitor: true,
            failsafe: false,
            drive_faults: [false; 2],
            battery_raw: voltage_to_raw(12.0),
            limits: encode_battery_limits(BatteryLimits {
                minimum: BATTERY_MIN_DEFAULT,
                maximum: BATTERY_MAX_DEFAULT,
            }),
            external_leds: Vec::new(),
            last_write: Instant::now(),
            pending: None,
        }
    }

    fn motor_index(motor: Motor) -> usize {
        match motor {
            Motor::One => 0,
            Motor::Two => 1,
        }
    }

    fn respond(&mut self, command: Command, data: &[u8]) {
        let mut frame = [0u8; READ_LEN];
        frame[0] = command.code();
        frame[1..=data.len()].copy_from_slice(data);
        self.pending = Some(frame);
    }

    /// Apply one write frame; returns the new address after SET_ADDRESS
    fn handle_write(&mut self, bytes: &[u8]) -> io::Result<Option<u8>> {
        let Some((&code, payload)) = bytes.split_first() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty frame"));
        };

        if self.failsafe && self.last_write.elapsed() > FAILSAFE_WINDOW {
            debug!("Simulated failsafe fired");
            self.motors = [(VALUE_FWD, 0); 2];
        }
        self.last_write = Instant::now();
        self.writes += 1;

        let Ok(command) = Command::try_from(code) else {
            // Unknown commands are ignored by the firmware
            return Ok(None);
        };
        let arg = |i: usize| payload.get(i).copied().unwrap_or(0);

        use Command::*;
        match command {
            GetId => {
                let id = self.id;
                self.respond(command, &[id]);
            }
            SetAFwd | SetBFwd | SetARev | SetBRev => {
                let index = if matches!(command, SetAFwd | SetARev) { 0 } else { 1 };
                let direction = if matches!(command, SetAFwd | SetBFwd) {
                    VALUE_FWD
                } else {
                    VALUE_REV
                };
                self.motors[index] = (direction, arg(0));
            }
            SetAllFwd => self.motors = [(VALUE_FWD, arg(0)); 2],
            SetAllRev => self.motors = [(VALUE_REV, arg(0)); 2],
            AllOff => self.motors = [(VALUE_FWD, 0); 2],
            GetA | GetB => {
                let (direction, pwm) = self.motors[if command == GetA { 0 } else { 1 }];
                self.respond(command, &[direction, pwm]);
            }
            SetLed1 | SetLed2 | SetLeds => {
                let rgb = [arg(0), arg(1), arg(2)];
                match command {
                    SetLed1 => self.leds[0] = rgb,
                    SetLed2 => self.leds[1] = rgb,
                    _ => self.leds = [rgb; 2],
                }
            }
            GetLed1 | GetLed2 => {
                let rgb = self.leds[if command == GetLed1 { 0 } else { 1 }];
                self.respond(command, &rgb);
            }
            SetLedBattMon => self.led_battery_monitor = arg(0) != 0,
            GetLedBattMon => {
                let on = encode_bool(self.led_battery_monitor);
                self.respond(command, &[on]);
            }
            SetFailsafe => self.failsafe = arg(0) != 0,
            GetFailsafe => {
                let on = encode_bool(self.failsafe);
                self.respond(command, &[on]);
            }
            GetDriveFaultA | GetDriveFaultB => {
                let fault = self.drive_faults[if command == GetDriveFaultA { 0 } else { 1 }];
                self.respond(command, &[encode_bool(fault)]);
            }
            GetBattVolt => {
                let [hi, lo] = self.battery_raw.to_be_bytes();
                self.respond(command, &[hi, lo]);
            }
            SetBattLimits => self.limits = [arg(0), arg(1)],
            GetBattLimits => {
                let limits = self.limits;
                self.respond(command, &limits);
            }
            WriteExternalLed => {
                self.external_leds
                    .push([arg(0), arg(1), arg(2), arg(3)]);
            }
            SetAddress => return Ok(Some(arg(0))),
        }
        Ok(None)
    }
}

fn voltage_to_raw(volts: f32) -> u16 {
    (volts / VOLTAGE_PIN_MAX * ANALOG_MAX as f32)
        .round()
        .clamp(0.0, ANALOG_MAX as f32) as u16
}

#[derive(Debug)]
struct SimState {
    default_bus: u8,
    buses: BTreeMap<u8, BTreeMap<u8, SimBoard>>,
    // (bus, address) pairs held by some other driver
    claimed: BTreeSet<(u8, u8)>,
    stale_reads: usize,
}

impl SimState {
    fn board(&mut self, bus: u8, address: u8) -> Option<&mut SimBoard> {
        self.buses.get_mut(&bus)?.get_mut(&address)
    }
}

/// Simulated buses holding any number of boards; clones share state
///
/// The address-only helpers act on the bus given to [`SimBus::new`].
#[derive(Debug, Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    /// An empty bus with the given number
    pub fn new(bus: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                default_bus: bus,
                buses: BTreeMap::from([(bus, BTreeMap::new())]),
                claimed: BTreeSet::new(),
                stale_reads: 0,
            })),
        }
    }

    /// A bus with one board at `address`
    pub fn with_board(bus: u8, address: u8) -> Self {
        let sim = Self::new(bus);
        sim.add_board(address);
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_device<T>(&self, address: u8, f: impl FnOnce(&mut SimBoard) -> T) -> Option<T> {
        let mut state = self.lock();
        let bus = state.default_bus;
        state.board(bus, address).map(f)
    }

    pub fn bus(&self) -> u8 {
        self.lock().default_bus
    }

    /// Make another (empty) bus device available
    pub fn add_bus(&self, bus: u8) {
        self.lock().buses.entry(bus).or_default();
    }

    pub fn add_board(&self, address: u8) {
        self.add_device(address, BOARD_ID);
    }

    /// A board on some other bus, creating the bus if needed
    pub fn add_board_on(&self, bus: u8, address: u8) {
        self.lock()
            .buses
            .entry(bus)
            .or_default()
            .insert(address, SimBoard::new(BOARD_ID));
    }

    /// Some other device answering GET_ID with a different identifier
    pub fn add_device(&self, address: u8, id: u8) {
        let mut state = self.lock();
        let bus = state.default_bus;
        state
            .buses
            .entry(bus)
            .or_default()
            .insert(address, SimBoard::new(id));
    }

    /// Refuse to bind `address` on `bus`, as for an address owned by a kernel driver
    pub fn claim_address(&self, bus: u8, address: u8) {
        self.lock().claimed.insert((bus, address));
    }

    /// Addresses of every device on the default bus, ascending
    pub fn addresses(&self) -> Vec<u8> {
        let state = self.lock();
        let addresses = state
            .buses
            .get(&state.default_bus)
            .map(|devices| devices.keys().copied().collect())
            .unwrap_or_default();
        addresses
    }

    /// Make the next `count` reads return a frame with a wrong echo byte
    pub fn inject_stale_reads(&self, count: usize) {
        self.lock().stale_reads = count;
    }

    pub fn set_battery_voltage(&self, address: u8, volts: f32) {
        self.with_device(address, |b| b.battery_raw = voltage_to_raw(volts));
    }

    pub fn set_drive_fault(&self, address: u8, motor: Motor, fault: bool) {
        self.with_device(address, |b| {
            b.drive_faults[SimBoard::motor_index(motor)] = fault
        });
    }

    /// Raw (direction value, pwm) of a motor
    pub fn motor_raw(&self, address: u8, motor: Motor) -> Option<(u8, u8)> {
        self.with_device(address, |b| b.motors[SimBoard::motor_index(motor)])
    }

    /// Overwrite the raw motor state, including direction values the firmware never uses
    pub fn set_motor_raw(&self, address: u8, motor: Motor, raw: (u8, u8)) {
        self.with_device(address, |b| b.motors[SimBoard::motor_index(motor)] = raw);
    }

    /// Number of frames the board has received
    pub fn write_count(&self, address: u8) -> usize {
        self.with_device(address, |b| b.writes).unwrap_or(0)
    }

    /// Every 32-bit word written to the external LED chain so far
    pub fn external_led_words(&self, address: u8) -> Vec<[u8; 4]> {
        self.with_device(address, |b| b.external_leds.clone())
            .unwrap_or_default()
    }
}

impl ChannelProvider for SimBus {
    type Channel = SimChannel;

    fn open(&self, bus: u8, address: u8) -> io::Result<SimChannel> {
        let state = self.lock();
        if !state.buses.contains_key(&bus) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such bus: {}", bus),
            ));
        }
        if state.claimed.contains(&(bus, address)) {
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                format!("0x{:02X} is in use by another driver", address),
            ));
        }
        Ok(SimChannel {
            state: Arc::clone(&self.state),
            bus,
            address,
            closed: false,
        })
    }
}

/// Channel bound to one simulated address
#[derive(Debug)]
pub struct SimChannel {
    state: Arc<Mutex<SimState>>,
    bus: u8,
    address: u8,
    closed: bool,
}

impl SimChannel {
    fn lock(&self) -> io::Result<MutexGuard<'_, SimState>> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn no_device(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no device at 0x{:02X}", self.address),
        )
    }
}

impl ByteChannel for SimChannel {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock()?;
        let board = state
            .board(self.bus, self.address)
            .ok_or_else(|| self.no_device())?;

        if let Some(new_address) = board.handle_write(bytes)? {
            if let Some(devices) = state.buses.get_mut(&self.bus) {
                if let Some(mut board) = devices.remove(&self.address) {
                    board.pending = None;
                    debug!(
                        "Simulated board moved from 0x{:02X} to 0x{:02X}",
                        self.address, new_address
                    );
                    devices.insert(new_address, board);
                }
            }
        }
        Ok(())
    }

    fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut state = self.lock()?;
        if state.stale_reads > 0 {
            state.stale_reads -= 1;
            let mut stale = vec![0u8; len];
            if let Some(first) = stale.first_mut() {
                *first = 0xFF;
            }
            return Ok(stale);
        }

        let board = state
            .board(self.bus, self.address)
            .ok_or_else(|| self.no_device())?;
        let mut data = board.pending.take().unwrap_or([0; READ_LEN]).to_vec();
        data.resize(len, 0);
        Ok(data)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
