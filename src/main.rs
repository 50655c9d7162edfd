// tborg: command-line access to a ThunderBorg board
//
// Usage: tborg [--bus N] [--address 0xNN] [--sim] <command>
// Example: tborg find
//          tborg set-address 0x16 --current 0x15
//          echo '{"throttle": 0.3}' | tborg drive

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use thunderborg::board::{self, BoardSession, ChannelProvider, Color, Led, Mixer, Motor};
use thunderborg::config::SessionConfig;
use thunderborg::messages::DriveCommand;
use thunderborg::runtime;
use thunderborg::sim::SimBus;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "tborg", about = "ThunderBorg motor controller tool")]
struct Cli {
    /// JSON session config; flags override its fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// I2C bus number (0 for rev 1 boards, 1 for rev 2)
    #[arg(long, global = true)]
    bus: Option<u8>,

    /// Board address, decimal or 0x-prefixed hex
    #[arg(long, global = true, value_parser = parse_address)]
    address: Option<u8>,

    /// Scan for a board if none answers at the configured address
    #[arg(long, global = true)]
    auto_discover: bool,

    /// Talk to an in-memory board instead of hardware
    #[arg(long, global = true)]
    sim: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List every ThunderBorg address on the bus
    Find,
    /// Move a board to a new address (stored in EEPROM)
    SetAddress {
        #[arg(value_parser = parse_address)]
        new: u8,
        /// Current address; scans the bus when omitted
        #[arg(long, value_parser = parse_address)]
        current: Option<u8>,
    },
    /// Print motors, LEDs, failsafe, faults and battery readings
    Status,
    /// Stop both motors
    Halt,
    /// Store battery monitoring limits (volts)
    Limits { minimum: f32, maximum: f32 },
    /// Set both on-board LEDs (channels 0.0 - 1.0)
    Leds { r: f32, g: f32, b: f32 },
    /// Drive from JSON DriveCommand lines on stdin
    Drive {
        /// Battery voltage feeding the board
        #[arg(long, default_value_t = 12.0)]
        supply: f32,
        /// Rated motor voltage
        #[arg(long, default_value_t = 12.0)]
        motor: f32,
    },
}

fn parse_address(text: &str) -> Result<u8, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", text, e))
}

fn session_config(cli: &Cli) -> Result<SessionConfig, BoxError> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };
    if let Some(bus) = cli.bus {
        config.bus = bus;
    }
    if let Some(address) = cli.address {
        config.address = address;
    }
    config.auto_discover |= cli.auto_discover;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging (RUST_LOG overrides)
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse().unwrap()))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("tborg error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = session_config(&cli)?;

    if cli.sim {
        info!(
            "Using simulated board on bus {} at 0x{:02X}",
            config.bus, config.address
        );
        let sim = SimBus::with_board(config.bus, config.address);
        return execute(sim, config, cli.command).await;
    }

    #[cfg(target_os = "linux")]
    return execute(board::I2cBus::new(), config, cli.command).await;

    #[cfg(not(target_os = "linux"))]
    return Err("I2C hardware access needs Linux; use --sim".into());
}

async fn execute<P: ChannelProvider>(
    provider: P,
    config: SessionConfig,
    command: Cmd,
) -> Result<(), BoxError> {
    match command {
        Cmd::Find => {
            let found = board::find_board(&provider, config.bus)?;
            if found.is_empty() {
                println!("No ThunderBorg boards found on bus {}", config.bus);
            }
            for address in found {
                println!("0x{:02X}", address);
            }
        }
        Cmd::SetAddress { new, current } => {
            board::relocate_board(&provider, config.bus, new, current)?;
            println!("Board now at 0x{:02X} (persists across power cycles)", new);
        }
        Cmd::Status => {
            let mut tb = BoardSession::open(provider, config)?;
            print_status(&mut tb)?;
        }
        Cmd::Halt => {
            BoardSession::open(provider, config)?.halt_motors()?;
        }
        Cmd::Limits { minimum, maximum } => {
            let mut tb = BoardSession::open(provider, config)?;
            tb.set_battery_limits(minimum, maximum)?;
            let limits = tb.get_battery_limits()?;
            println!(
                "Battery limits: {:.2} V - {:.2} V",
                limits.minimum, limits.maximum
            );
        }
        Cmd::Leds { r, g, b } => {
            let mut tb = BoardSession::open(provider, config)?;
            tb.set_led_battery_monitor(false)?;
            tb.set_both_leds(Color::new(r, g, b))?;
        }
        Cmd::Drive { supply, motor } => {
            let mut tb = BoardSession::open(provider, config)?;
            let (tx, rx) = mpsc::channel(16);
            let reader = tokio::spawn(read_commands(tx));
            runtime::run(&mut tb, rx, Mixer::for_voltages(supply, motor)).await?;
            reader.await??;
            tb.close();
        }
    }
    Ok(())
}

fn print_status<P: ChannelProvider>(tb: &mut BoardSession<P>) -> Result<(), BoxError> {
    if let Some((bus, address)) = tb.location() {
        println!("ThunderBorg on bus {} at 0x{:02X}", bus, address);
    }
    for motor in Motor::ALL {
        println!(
            "  Motor {:?}: level {:+.3}, fault {}",
            motor,
            tb.get_motor(motor)?,
            tb.get_drive_fault(motor)?
        );
    }
    for led in [Led::One, Led::Two] {
        let c = tb.get_led(led)?;
        println!("  LED {:?}: r {:.2} g {:.2} b {:.2}", led, c.r, c.g, c.b);
    }
    println!("  LED battery monitor: {}", tb.get_led_battery_monitor()?);
    println!("  Comms failsafe: {}", tb.get_comms_failsafe()?);

    let limits = tb.get_battery_limits()?;
    println!("  Battery: {:.2} V", tb.get_battery_voltage()?);
    println!(
        "  Battery limits: {:.2} V (red) - {:.2} V (green)",
        limits.minimum, limits.maximum
    );
    Ok(())
}

/// Forward JSON lines from stdin until EOF or Ctrl+C
async fn read_commands(tx: mpsc::Sender<DriveCommand>) -> Result<(), BoxError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DriveCommand>(&line) {
            Ok(cmd) => {
                if tx.send(cmd).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Failed to parse command: {}", e),
        }
    }
    Ok(())
}
