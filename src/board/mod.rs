// ThunderBorg dual motor controller
//
// Provides:
// - Byte channel abstraction and the Linux /dev/i2c-N implementation
// - Command codec (PWM, colour, voltage scaling)
// - Board session with retrying reads
// - Bus scanning and address relocation
// - Skid-steer mixing for two-motor chassis

pub mod channel;
pub mod codec;
pub mod error;
pub mod handle;
pub mod locator;
pub mod mixing;
mod session;

pub use channel::{ByteChannel, ChannelProvider};
#[cfg(target_os = "linux")]
pub use channel::{I2cBus, I2cChannel};
pub use codec::{BatteryLimits, Color, Command, Led, Motor};
pub use error::{BoardError, Result};
pub use handle::BoardHandle;
pub use locator::{find_board, relocate_board};
pub use mixing::Mixer;
pub use session::{BoardSession, SessionState};
