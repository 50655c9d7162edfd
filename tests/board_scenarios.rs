// End-to-end scenarios against the simulated board

use std::thread::sleep;
use std::time::Duration;

use thunderborg::board::{BoardSession, Motor, find_board, relocate_board};
use thunderborg::config::SessionConfig;
use thunderborg::sim::SimBus;

fn connect(sim: &SimBus) -> BoardSession<SimBus> {
    BoardSession::open(sim.clone(), SessionConfig::new(1, 0x15)).unwrap()
}

#[test]
fn halt_twice_leaves_both_motors_stopped() {
    let sim = SimBus::with_board(1, 0x15);
    let mut tb = connect(&sim);

    tb.set_motor(Motor::One, 0.6).unwrap();
    tb.set_motor(Motor::Two, -0.9).unwrap();
    tb.halt_motors().unwrap();
    tb.halt_motors().unwrap();

    assert_eq!(tb.get_motor(Motor::One).unwrap(), 0.0);
    assert_eq!(tb.get_motor(Motor::Two).unwrap(), 0.0);
}

#[test]
fn full_scale_motor_levels() {
    let sim = SimBus::with_board(1, 0x15);
    let mut tb = connect(&sim);

    tb.set_motor(Motor::One, 1.0).unwrap();
    let level = tb.get_motor(Motor::One).unwrap();
    assert!((0.98..=1.0).contains(&level), "got {}", level);

    tb.set_motor(Motor::One, -1.0).unwrap();
    let level = tb.get_motor(Motor::One).unwrap();
    assert!((-1.0..=-0.98).contains(&level), "got {}", level);
}

#[test]
fn find_board_reports_only_the_board() {
    let sim = SimBus::with_board(1, 0x15);
    assert_eq!(find_board(&sim, 1).unwrap(), vec![0x15]);
}

#[test]
fn failsafe_stops_motors_when_commands_stop() {
    let sim = SimBus::with_board(1, 0x15);
    let mut tb = connect(&sim);

    tb.set_comms_failsafe(true).unwrap();
    assert!(tb.get_comms_failsafe().unwrap());
    tb.set_motor(Motor::One, 0.5).unwrap();
    tb.set_motor(Motor::Two, 0.5).unwrap();
    sleep(Duration::from_millis(300));

    assert_eq!(tb.get_motor(Motor::One).unwrap(), 0.0);
    assert_eq!(tb.get_motor(Motor::Two).unwrap(), 0.0);
}

#[test]
fn motors_hold_level_without_failsafe() {
    let sim = SimBus::with_board(1, 0x15);
    let mut tb = connect(&sim);

    tb.set_comms_failsafe(false).unwrap();
    tb.set_motor(Motor::One, 0.5).unwrap();
    tb.set_motor(Motor::Two, -0.5).unwrap();
    sleep(Duration::from_millis(300));

    assert!((tb.get_motor(Motor::One).unwrap() - 0.5).abs() <= 1.0 / 255.0);
    assert!((tb.get_motor(Motor::Two).unwrap() + 0.5).abs() <= 1.0 / 255.0);
}

#[test]
fn read_succeeds_on_third_attempt() {
    let sim = SimBus::with_board(1, 0x15);
    let mut tb = connect(&sim);
    tb.set_motor(Motor::Two, -0.4).unwrap();

    sim.inject_stale_reads(2);
    let level = tb.get_motor(Motor::Two).unwrap();
    assert!((level + 0.4).abs() <= 1.0 / 255.0);
}

#[test]
fn read_fails_after_three_stale_attempts() {
    let sim = SimBus::with_board(1, 0x15);
    let mut tb = connect(&sim);

    sim.inject_stale_reads(3);
    assert!(matches!(
        tb.get_comms_failsafe(),
        Err(thunderborg::board::BoardError::ProtocolMismatch { attempts: 3, .. })
    ));
    // The channel recovers once the stale bytes are gone
    assert!(!tb.get_comms_failsafe().unwrap());
}

#[test]
fn relocation_moves_board_in_scan_results() {
    let sim = SimBus::with_board(1, 0x15);
    relocate_board(&sim, 1, 0x70, Some(0x15)).unwrap();

    let found = find_board(&sim, 1).unwrap();
    assert_eq!(found, vec![0x70]);
    assert!(!found.contains(&0x15));

    // A session at the new address connects normally
    let tb = BoardSession::open(sim.clone(), SessionConfig::new(1, 0x70)).unwrap();
    assert_eq!(tb.location(), Some((1, 0x70)));
}
