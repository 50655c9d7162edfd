// Bus scanning and address relocation
//
// Both operations open their own short-lived channels, so they must not
// run while a session is mid-command on the same bus.

use std::io;
use std::thread::sleep;

use tracing::{debug, error, info, warn};

use super::channel::ChannelProvider;
use super::codec::Command;
use super::error::{BoardError, Result};
use super::handle::BoardHandle;
use crate::config::{ADDRESS_MAX, ADDRESS_MIN, ADDRESS_SETTLE};

/// Scan 0x03..=0x77 on `bus` and return every address answering as a ThunderBorg
///
/// Rev 1 boards sit on bus 0, rev 2 boards on bus 1. Fails only if the bus
/// device itself is missing; an address that cannot be bound (claimed by a
/// kernel driver, say) is skipped.
pub fn find_board<P: ChannelProvider>(provider: &P, bus: u8) -> Result<Vec<u8>> {
    info!("Scanning I2C bus {}", bus);
    let mut found = Vec::new();

    for address in ADDRESS_MIN..=ADDRESS_MAX {
        let mut handle = match BoardHandle::open(provider, bus, address) {
            Ok(handle) => handle,
            Err(BoardError::ChannelOpen { source, .. })
                if source.kind() != io::ErrorKind::NotFound =>
            {
                debug!("Skipping 0x{:02X} on bus {}: {}", address, bus, source);
                continue;
            }
            Err(e) => return Err(e),
        };
        if handle.probe()? {
            found.push(address);
        }
        handle.close();
    }

    if found.is_empty() {
        warn!(
            "No ThunderBorg boards found on bus {} (0 for rev 1, 1 for rev 2)",
            bus
        );
    }
    Ok(found)
}

/// Move a board to `new_address`
///
/// With no `old_address` the first board found on `bus` is moved. The new
/// address is stored in the board's EEPROM and survives power cycles; the
/// only way back is another relocation.
pub fn relocate_board<P: ChannelProvider>(
    provider: &P,
    bus: u8,
    new_address: u8,
    old_address: Option<u8>,
) -> Result<()> {
    if !(ADDRESS_MIN..=ADDRESS_MAX).contains(&new_address) {
        error!(
            "I2C addresses must be in the range 0x{:02X} to 0x{:02X}",
            ADDRESS_MIN, ADDRESS_MAX
        );
        return Err(BoardError::AddressRange {
            address: new_address,
        });
    }

    let old_address = match old_address {
        Some(address) => address,
        None => *find_board(provider, bus)?
            .first()
            .ok_or(BoardError::BoardNotFound { bus, address: None })?,
    };

    info!(
        "Changing I2C address from 0x{:02X} to 0x{:02X} on bus {}",
        old_address, new_address, bus
    );

    let mut handle = BoardHandle::open(provider, bus, old_address)?;
    if !handle.probe()? {
        return Err(BoardError::BoardNotFound {
            bus,
            address: Some(old_address),
        });
    }
    handle.write(Command::SetAddress, &[new_address])?;
    handle.close();
    sleep(ADDRESS_SETTLE);

    info!(
        "Address changed to 0x{:02X}, attempting to talk with the new address",
        new_address
    );
    let mut handle = BoardHandle::open(provider, bus, new_address)?;
    if !handle.probe()? {
        error!("Failed to set address to 0x{:02X}", new_address);
        return Err(BoardError::RelocationFailed {
            from: old_address,
            to: new_address,
        });
    }

    info!("New I2C address of 0x{:02X} set successfully", new_address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    #[test]
    fn test_find_single_board() {
        let sim = SimBus::with_board(1, 0x15);
        assert_eq!(find_board(&sim, 1).unwrap(), vec![0x15]);
    }

    #[test]
    fn test_find_ignores_foreign_devices() {
        let sim = SimBus::with_board(1, 0x15);
        sim.add_device(0x48, 0x01);
        sim.add_board(0x60);
        assert_eq!(find_board(&sim, 1).unwrap(), vec![0x15, 0x60]);
    }

    #[test]
    fn test_find_skips_claimed_addresses() {
        let sim = SimBus::with_board(1, 0x15);
        sim.claim_address(1, 0x10);
        sim.claim_address(1, 0x68);
        assert_eq!(find_board(&sim, 1).unwrap(), vec![0x15]);

        let sim = SimBus::with_board(1, 0x22);
        sim.claim_address(1, 0x03);
        relocate_board(&sim, 1, 0x15, None).unwrap();
        assert_eq!(sim.addresses(), vec![0x15]);
    }

    #[test]
    fn test_find_on_empty_bus() {
        let sim = SimBus::new(1);
        assert!(find_board(&sim, 1).unwrap().is_empty());
    }

    #[test]
    fn test_find_on_missing_bus() {
        let sim = SimBus::with_board(1, 0x15);
        assert!(matches!(
            find_board(&sim, 0),
            Err(BoardError::ChannelOpen { bus: 0, .. })
        ));
    }

    #[test]
    fn test_relocate_with_known_address() {
        let sim = SimBus::with_board(1, 0x15);
        relocate_board(&sim, 1, 0x70, Some(0x15)).unwrap();
        assert_eq!(find_board(&sim, 1).unwrap(), vec![0x70]);
    }

    #[test]
    fn test_relocate_first_found() {
        let sim = SimBus::with_board(1, 0x22);
        relocate_board(&sim, 1, 0x15, None).unwrap();
        assert_eq!(sim.addresses(), vec![0x15]);
    }

    #[test]
    fn test_relocate_rejects_out_of_range() {
        let sim = SimBus::with_board(1, 0x15);
        for address in [0x00, 0x02, 0x78, 0xFF] {
            assert!(matches!(
                relocate_board(&sim, 1, address, Some(0x15)),
                Err(BoardError::AddressRange { .. })
            ));
        }
        // Nothing was written
        assert_eq!(sim.addresses(), vec![0x15]);
    }

    #[test]
    fn test_relocate_missing_board() {
        let sim = SimBus::with_board(1, 0x15);
        assert!(matches!(
            relocate_board(&sim, 1, 0x70, Some(0x30)),
            Err(BoardError::BoardNotFound {
                address: Some(0x30),
                ..
            })
        ));

        let empty = SimBus::new(1);
        assert!(matches!(
            relocate_board(&empty, 1, 0x70, None),
            Err(BoardError::BoardNotFound { address: None, .. })
        ));
    }
}
