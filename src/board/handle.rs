// One open channel bound to one board address
//
// Implements the write-then-read discipline: every read re-sends the
// command with an empty payload and accepts only a 6-byte frame whose
// first byte echoes the command. Stale bytes from an earlier exchange
// show up as a mismatched echo and are retried.

use tracing::{debug, info, warn};

use super::channel::{ByteChannel, ChannelProvider};
use super::codec::{BOARD_ID, Command, Frame, build_frame};
use super::error::{BoardError, Result};
use crate::config::{READ_ATTEMPTS, READ_LEN};

/// Open channel plus the bus position it is bound to
pub struct BoardHandle<C: ByteChannel> {
    channel: C,
    bus: u8,
    address: u8,
    closed: bool,
}

impl<C: ByteChannel> BoardHandle<C> {
    /// Open a channel at `bus`/`address`; open failures are never retried
    pub fn open<P>(provider: &P, bus: u8, address: u8) -> Result<Self>
    where
        P: ChannelProvider<Channel = C>,
    {
        let channel = provider
            .open(bus, address)
            .map_err(|source| BoardError::ChannelOpen {
                bus,
                address,
                source,
            })?;
        Ok(Self::from_channel(channel, bus, address))
    }

    pub fn from_channel(channel: C, bus: u8, address: u8) -> Self {
        Self {
            channel,
            bus,
            address,
            closed: false,
        }
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Send `[command, payload...]`
    pub fn write(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(BoardError::NotConnected);
        }
        let frame = build_frame(command, payload);
        self.channel
            .write(&frame)
            .map_err(|e| BoardError::transport(command, e))
    }

    /// Issue `command` and read its response, retrying stale or failed reads
    pub fn read(&mut self, command: Command) -> Result<Frame> {
        let mut last_error = None;

        for attempt in 1..=READ_ATTEMPTS {
            match self.exchange(command) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {
                    last_error = None;
                    debug!(
                        "Attempt {}/{} for {:?} at 0x{:02X}: stale response",
                        attempt, READ_ATTEMPTS, command, self.address
                    );
                }
                Err(e @ (BoardError::Interrupted { .. } | BoardError::NotConnected)) => {
                    return Err(e);
                }
                Err(e) => {
                    debug!(
                        "Attempt {}/{} for {:?} at 0x{:02X}: {}",
                        attempt, READ_ATTEMPTS, command, self.address, e
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => {
                warn!(
                    "No matching response to {:?} from 0x{:02X} after {} attempts",
                    command, self.address, READ_ATTEMPTS
                );
                Err(BoardError::ProtocolMismatch {
                    command,
                    attempts: READ_ATTEMPTS,
                })
            }
        }
    }

    /// One write/read round; `None` means the frame did not match
    fn exchange(&mut self, command: Command) -> Result<Option<Frame>> {
        self.write(command, &[])?;
        let data = self
            .channel
            .read(READ_LEN)
            .map_err(|e| BoardError::transport(command, e))?;

        let frame = match <Frame>::try_from(data.as_slice()) {
            Ok(frame) => frame,
            Err(_) => return Ok(None),
        };
        Ok((frame[0] == command.code()).then_some(frame))
    }

    /// Ask for the board identifier; `false` for silence or a foreign device
    pub fn probe(&mut self) -> Result<bool> {
        let frame = match self.read(Command::GetId) {
            Ok(frame) => frame,
            Err(e @ BoardError::Interrupted { .. }) => return Err(e),
            Err(e) => {
                debug!(
                    "Nothing answering on bus {} at 0x{:02X}: {}",
                    self.bus, self.address, e
                );
                return Ok(false);
            }
        };

        if frame[1] == BOARD_ID {
            info!(
                "Found ThunderBorg on bus {} at address 0x{:02X}",
                self.bus, self.address
            );
            Ok(true)
        } else {
            info!(
                "Device at 0x{:02X} on bus {} is not a ThunderBorg (ID 0x{:02X} instead of 0x{:02X})",
                self.address, self.bus, frame[1], BOARD_ID
            );
            Ok(false)
        }
    }

    /// Release the channel; later calls are no-ops
    pub fn close(&mut self) {
        if !self.closed {
            self.channel.close();
            self.closed = true;
            debug!("Closed bus {} address 0x{:02X}", self.bus, self.address);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<C: ByteChannel> Drop for BoardHandle<C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Scripted channel: replays queued read results, records writes
    #[derive(Default)]
    struct Script {
        reads: VecDeque<io::Result<Vec<u8>>>,
        writes: Vec<Vec<u8>>,
        closes: usize,
    }

    impl ByteChannel for Script {
        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.writes.push(bytes.to_vec());
            Ok(())
        }

        fn read(&mut self, _len: usize) -> io::Result<Vec<u8>> {
            self.reads
                .pop_front()
                .unwrap_or_else(|| Ok(vec![0; READ_LEN]))
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    fn handle(reads: Vec<io::Result<Vec<u8>>>) -> BoardHandle<Script> {
        let script = Script {
            reads: reads.into(),
            ..Script::default()
        };
        BoardHandle::from_channel(script, 1, 0x15)
    }

    #[test]
    fn test_read_accepts_third_attempt() {
        let mut h = handle(vec![
            Ok(vec![0x07, 1, 2, 3, 4, 5]),
            Ok(vec![0x07, 1, 2, 3, 4, 5]),
            Ok(vec![10, 1, 200, 0, 0, 0]),
        ]);
        let frame = h.read(Command::GetA).unwrap();
        assert_eq!(frame, [10, 1, 200, 0, 0, 0]);
        // Each attempt re-sends the command with an empty payload
        assert_eq!(h.channel.writes, vec![vec![10u8]; 3]);
    }

    #[test]
    fn test_read_gives_up_after_three_mismatches() {
        let mut h = handle(vec![
            Ok(vec![0, 0, 0, 0, 0, 0]),
            Ok(vec![0, 0, 0, 0, 0, 0]),
            Ok(vec![0, 0, 0, 0, 0, 0]),
            Ok(vec![20, 1, 0, 0, 0, 0]),
        ]);
        let err = h.read(Command::GetFailsafe).unwrap_err();
        assert!(matches!(
            err,
            BoardError::ProtocolMismatch {
                command: Command::GetFailsafe,
                attempts: 3
            }
        ));
        assert_eq!(h.channel.writes.len(), 3);
    }

    #[test]
    fn test_short_frame_is_retried() {
        let mut h = handle(vec![Ok(vec![21, 1]), Ok(vec![21, 1, 2, 0, 0, 0])]);
        assert_eq!(h.read(Command::GetBattVolt).unwrap()[2], 2);
    }

    #[test]
    fn test_io_errors_are_wrapped_after_retries() {
        let mut h = handle(vec![
            Err(io::Error::other("bus glitch")),
            Err(io::Error::other("bus glitch")),
            Err(io::Error::other("bus glitch")),
        ]);
        let err = h.read(Command::GetId).unwrap_err();
        assert!(matches!(err, BoardError::Io { command: Command::GetId, .. }));
    }

    #[test]
    fn test_interrupt_aborts_retry_loop() {
        let mut h = handle(vec![
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(vec![0x99, 0x15, 0, 0, 0, 0]),
        ]);
        let err = h.read(Command::GetId).unwrap_err();
        assert!(matches!(err, BoardError::Interrupted { .. }));
        assert_eq!(h.channel.writes.len(), 1);
    }

    #[test]
    fn test_probe() {
        let mut h = handle(vec![Ok(vec![0x99, 0x15, 0, 0, 0, 0])]);
        assert!(h.probe().unwrap());

        let mut foreign = handle(vec![Ok(vec![0x99, 0x42, 0, 0, 0, 0])]);
        assert!(!foreign.probe().unwrap());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut h = handle(vec![]);
        h.close();
        h.close();
        assert!(h.is_closed());
        assert_eq!(h.channel.closes, 1);
        assert!(matches!(
            h.write(Command::AllOff, &[0]),
            Err(BoardError::NotConnected)
        ));
    }
}
