// Error taxonomy for the board protocol
//
// Transport errors never leave the crate raw: they are wrapped here at the
// channel boundary. Interrupted I/O is the one exception that short-circuits
// any retry loop.

use super::codec::{Command, Motor};

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("Could not open bus {bus} at address 0x{address:02X}: {source}")]
    ChannelOpen {
        bus: u8,
        address: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error during {command:?}: {source}")]
    Io {
        command: Command,
        #[source]
        source: std::io::Error,
    },

    #[error("No matching response to {command:?} after {attempts} attempts")]
    ProtocolMismatch { command: Command, attempts: usize },

    #[error("Invalid direction 0x{value:02X} while reading motor {motor:?}")]
    UnexpectedDirection { motor: Motor, value: u8 },

    #[error("No board found on bus {bus}{}", at_address(.address))]
    BoardNotFound { bus: u8, address: Option<u8> },

    #[error("Address 0x{address:02X} is outside 0x03..=0x77")]
    AddressRange { address: u8 },

    #[error("Board did not answer at 0x{to:02X} after moving from 0x{from:02X}")]
    RelocationFailed { from: u8, to: u8 },

    #[error("Board session is not connected")]
    NotConnected,

    #[error("Interrupted during {command:?}")]
    Interrupted { command: Command },
}

impl BoardError {
    /// Wrap a transport error raised while exchanging `command`
    pub(crate) fn transport(command: Command, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::Interrupted {
            BoardError::Interrupted { command }
        } else {
            BoardError::Io { command, source }
        }
    }
}

fn at_address(address: &Option<u8>) -> String {
    match address {
        Some(a) => format!(" at address 0x{a:02X}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, BoardError>;
