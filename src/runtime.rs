// 50 Hz drive loop with watchdog
//
// Commands arrive over a channel from whatever produces them (keyboard,
// joystick, script). Every tick re-sends the motor levels, which also keeps
// the board's comms failsafe fed; if the producer goes quiet the loop drives
// zero, and if the producer hangs up the motors are halted.

use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::board::channel::ChannelProvider;
use crate::board::codec::{Color, Motor};
use crate::board::error::Result;
use crate::board::mixing::Mixer;
use crate::board::BoardSession;
use crate::config::{CMD_TIMEOUT, LOOP_HZ};
use crate::messages::{DriveCommand, MotorLevels, RuntimeHealth};

pub struct Runtime {
    mixer: Mixer,
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    cmd_stale: bool,
    fault_shown: bool,
}

impl Runtime {
    pub fn new(mixer: Mixer) -> Self {
        Self {
            mixer,
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            cmd_stale: true, // Start stale until first cmd
            fault_shown: false,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        if self.fault_shown {
            RuntimeHealth::DriveFault
        } else if self.cmd_stale {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        }
    }

    /// Process incoming command
    fn on_command(&mut self, cmd: DriveCommand) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Compute motor levels based on watchdog state
    fn compute_levels(&mut self) -> MotorLevels {
        let cmd_age = self.cmd_received_at.elapsed();

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the motors
            if !self.cmd_stale {
                warn!("Command stale ({:?} old), stopping motors", cmd_age);
            }
            self.cmd_stale = true;
            MotorLevels::zero()
        } else if let Some(ref cmd) = self.latest_cmd {
            self.cmd_stale = false;
            self.mixer.mix(cmd)
        } else {
            // No command ever received
            self.cmd_stale = true;
            MotorLevels::zero()
        }
    }

    /// Purple LEDs while either drive reports a fault, battery monitor otherwise
    fn update_fault_leds<P: ChannelProvider>(&mut self, session: &mut BoardSession<P>) -> Result<()> {
        let fault =
            session.get_drive_fault(Motor::One)? || session.get_drive_fault(Motor::Two)?;

        if fault && !self.fault_shown {
            warn!("Drive fault reported, check supply and motor wiring");
            session.set_led_battery_monitor(false)?;
            session.set_both_leds(Color::PURPLE)?;
            self.fault_shown = true;
        } else if !fault && self.fault_shown {
            info!("Drive fault cleared");
            session.set_led_battery_monitor(true)?;
            self.fault_shown = false;
        }
        Ok(())
    }
}

/// Log the battery monitoring settings and the present voltage
pub fn log_battery<P: ChannelProvider>(session: &mut BoardSession<P>) -> Result<()> {
    let limits = session.get_battery_limits()?;
    let current = session.get_battery_voltage()?;
    info!(
        "Battery: minimum (red) {:.2} V, middle (yellow) {:.2} V, maximum (green) {:.2} V, current {:.2} V",
        limits.minimum,
        (limits.minimum + limits.maximum) / 2.0,
        limits.maximum,
        current
    );
    Ok(())
}

/// Drive the board from `commands` until the sender side is dropped
pub async fn run<P: ChannelProvider>(
    session: &mut BoardSession<P>,
    mut commands: mpsc::Receiver<DriveCommand>,
    mixer: Mixer,
) -> Result<()> {
    session.set_comms_failsafe(true)?;
    if !session.get_comms_failsafe()? {
        warn!("The failsafe mode could not be turned on");
    }
    log_battery(session)?;
    session.halt_motors()?;
    session.set_led_battery_monitor(true)?;

    let mut runtime = Runtime::new(mixer);
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );

    loop {
        tick.tick().await;

        // 1. Drain all pending commands, keep latest
        let mut hung_up = false;
        loop {
            match commands.try_recv() {
                Ok(cmd) => runtime.on_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    hung_up = true;
                    break;
                }
            }
        }

        // 2. Compute and send levels (includes watchdog logic)
        let levels = runtime.compute_levels();
        session.set_motor(Motor::One, levels.one)?;
        session.set_motor(Motor::Two, levels.two)?;

        // 3. Reflect drive faults on the LEDs
        runtime.update_fault_leds(session)?;

        if hung_up {
            break;
        }
    }

    info!("Command source closed, halting motors");
    session.halt_motors()?;
    session.set_comms_failsafe(false)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::codec::{VALUE_FWD, VALUE_REV};
    use crate::config::SessionConfig;
    use crate::sim::SimBus;

    #[test]
    fn test_starts_stale() {
        let mut runtime = Runtime::new(Mixer::default());
        assert_eq!(runtime.compute_levels(), MotorLevels::zero());
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_fresh_command_is_mixed() {
        let mut runtime = Runtime::new(Mixer::default());
        runtime.on_command(DriveCommand {
            throttle: 0.4,
            ..DriveCommand::default()
        });
        assert_eq!(runtime.compute_levels(), MotorLevels::new(0.4, 0.4));
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_watchdog_zeros_old_command() {
        let mut runtime = Runtime::new(Mixer::default());
        runtime.on_command(DriveCommand {
            throttle: 1.0,
            ..DriveCommand::default()
        });
        runtime.cmd_received_at = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap();
        assert_eq!(runtime.compute_levels(), MotorLevels::zero());
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_fault_leds_toggle() {
        let sim = SimBus::with_board(1, 0x15);
        let mut session = BoardSession::open(sim.clone(), SessionConfig::default()).unwrap();
        let mut runtime = Runtime::new(Mixer::default());

        sim.set_drive_fault(0x15, Motor::One, true);
        runtime.update_fault_leds(&mut session).unwrap();
        assert_eq!(runtime.health(), RuntimeHealth::DriveFault);
        assert!(!session.get_led_battery_monitor().unwrap());
        assert_eq!(
            session.get_led(crate::board::codec::Led::One).unwrap(),
            Color::PURPLE
        );

        sim.set_drive_fault(0x15, Motor::One, false);
        runtime.update_fault_leds(&mut session).unwrap();
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
        assert!(session.get_led_battery_monitor().unwrap());
    }

    #[tokio::test]
    async fn test_run_drives_then_halts() {
        let sim = SimBus::with_board(1, 0x15);
        let mut session = BoardSession::open(sim.clone(), SessionConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel(8);

        let probe = sim.clone();
        let producer = async move {
            tx.send(DriveCommand {
                throttle: -0.5,
                ..DriveCommand::default()
            })
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            let seen = probe.motor_raw(0x15, Motor::One);
            drop(tx);
            seen
        };

        let (result, seen) = tokio::join!(run(&mut session, rx, Mixer::default()), producer);
        result.unwrap();
        assert_eq!(seen, Some((VALUE_REV, 128)));
        assert_eq!(sim.motor_raw(0x15, Motor::One), Some((VALUE_FWD, 0)));
        assert_eq!(sim.motor_raw(0x15, Motor::Two), Some((VALUE_FWD, 0)));
        assert!(!session.get_comms_failsafe().unwrap());
    }
}
