// Byte channel to a single addressed device on a bus
//
// The board protocol is strictly half-duplex: one write, then one read.
// A channel is bound to one (bus, address) pair for its whole life.

use std::io;

/// Duplex byte stream bound to one device address
pub trait ByteChannel {
    /// Send a complete frame
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read up to `len` bytes as one transaction
    fn read(&mut self, len: usize) -> io::Result<Vec<u8>>;

    /// Release the device; calling it again must be a no-op
    fn close(&mut self);
}

/// Opens channels on numbered buses
pub trait ChannelProvider {
    type Channel: ByteChannel;

    /// Open the bus device and bind it to `address`
    fn open(&self, bus: u8, address: u8) -> io::Result<Self::Channel>;
}

#[cfg(target_os = "linux")]
pub use self::linux::{I2cBus, I2cChannel};

#[cfg(target_os = "linux")]
mod linux {
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::fd::AsRawFd;

    use tracing::debug;

    use super::{ByteChannel, ChannelProvider};
    use crate::config::DEVICE_PATH_PREFIX;

    // I2C_SLAVE from linux/i2c-dev.h
    nix::ioctl_write_int_bad!(i2c_set_slave, 0x0703);

    /// Linux `/dev/i2c-N` character devices
    #[derive(Debug, Clone)]
    pub struct I2cBus {
        prefix: String,
    }

    impl Default for I2cBus {
        fn default() -> Self {
            Self::new()
        }
    }

    impl I2cBus {
        pub fn new() -> Self {
            Self::with_prefix(DEVICE_PATH_PREFIX)
        }

        /// Use a different device path prefix (bus number is appended)
        pub fn with_prefix(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
            }
        }

        pub fn device_path(&self, bus: u8) -> String {
            format!("{}{}", self.prefix, bus)
        }
    }

    impl ChannelProvider for I2cBus {
        type Channel = I2cChannel;

        fn open(&self, bus: u8, address: u8) -> io::Result<I2cChannel> {
            let path = self.device_path(bus);
            let file = OpenOptions::new().read(true).write(true).open(&path)?;

            // Safety: the fd is owned by `file` and stays open for the call
            unsafe { i2c_set_slave(file.as_raw_fd(), address as std::ffi::c_int) }
                .map_err(io::Error::from)?;

            debug!("Opened {} at address 0x{:02X}", path, address);
            Ok(I2cChannel { file: Some(file) })
        }
    }

    /// An open, address-bound I2C device
    pub struct I2cChannel {
        file: Option<File>,
    }

    impl I2cChannel {
        fn file(&mut self) -> io::Result<&mut File> {
            self.file
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel closed"))
        }
    }

    impl ByteChannel for I2cChannel {
        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.file()?.write_all(bytes)
        }

        fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
            let mut buf = vec![0u8; len];
            let n = self.file()?.read(&mut buf)?;
            buf.truncate(n);
            Ok(buf)
        }

        fn close(&mut self) {
            if self.file.take().is_some() {
                debug!("I2C channel closed");
            }
        }
    }
}
