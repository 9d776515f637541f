//! SMBus transaction gateway.
//!
//! Translates logical I2C transactions into the two ioctls the kernel's
//! `/dev/i2c-N` character devices understand: slave-address select and
//! SMBus transfer. [`linux`] holds the real implementation and with it the
//! only unsafe memory aliasing in the crate; [`mock`] is the deterministic
//! test double implementing the same trait.

pub mod linux;
pub mod mock;

pub use linux::LinuxSmbus;
pub use mock::MockSmbus;

use crate::fs::SysFile;
use crate::i2c::I2cError;

/// ioctl request selecting the slave address for a device file.
pub const I2C_SLAVE: libc::c_ulong = 0x0703;

/// ioctl request executing one SMBus transfer.
pub const I2C_SMBUS: libc::c_ulong = 0x0720;

/// Largest payload a block transfer can carry.
pub const BLOCK_MAX: usize = 32;

pub(crate) const SMBUS_WRITE: u8 = 0;
pub(crate) const SMBUS_READ: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Fixed transaction shapes the kernel ioctl interface understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// A single byte, no register: the value travels in the register slot
    /// on writes and in the payload on reads.
    Byte,
    ByteData,
    WordData,
    BlockData,
    I2cBlockData,
}

impl Protocol {
    /// Size code in the kernel's transfer header.
    pub(crate) fn code(self) -> u32 {
        match self {
            Protocol::Byte => 1,
            Protocol::ByteData => 2,
            Protocol::WordData => 3,
            Protocol::BlockData => 5,
            Protocol::I2cBlockData => 8,
        }
    }

    pub fn is_block(self) -> bool {
        matches!(self, Protocol::BlockData | Protocol::I2cBlockData)
    }

    /// Payload bytes this protocol moves for a caller buffer of `available`
    /// bytes. Block payloads are capped at [`BLOCK_MAX`].
    pub fn payload_len(self, available: usize) -> usize {
        match self {
            Protocol::Byte | Protocol::ByteData => 1,
            Protocol::WordData => 2,
            Protocol::BlockData | Protocol::I2cBlockData => available.min(BLOCK_MAX),
        }
    }
}

/// One SMBus exchange.
///
/// `payload` holds plain data bytes in wire order (words little-endian).
/// For block protocols the length-prefix byte the kernel sees is added and
/// stripped by the port implementation; callers never deal with it. The
/// payload length is protocol-determined; handing over a shorter buffer is
/// a programming error, not a runtime condition to recover from.
#[derive(Debug)]
pub struct Transaction<'a> {
    pub direction: Direction,
    pub protocol: Protocol,
    pub register: u8,
    pub payload: &'a mut [u8],
}

impl<'a> Transaction<'a> {
    pub fn read(protocol: Protocol, register: u8, payload: &'a mut [u8]) -> Self {
        let txn = Self {
            direction: Direction::Read,
            protocol,
            register,
            payload,
        };
        txn.check_payload();
        txn
    }

    pub fn write(protocol: Protocol, register: u8, payload: &'a mut [u8]) -> Self {
        let txn = Self {
            direction: Direction::Write,
            protocol,
            register,
            payload,
        };
        txn.check_payload();
        txn
    }

    fn check_payload(&self) {
        match self.protocol {
            // A byte write carries its value in the register slot.
            Protocol::Byte if self.direction == Direction::Write => {
                debug_assert!(self.payload.is_empty(), "byte write carries no payload")
            }
            Protocol::Byte | Protocol::ByteData => {
                debug_assert!(self.payload.len() == 1, "byte transfer needs a 1-byte payload")
            }
            Protocol::WordData => {
                debug_assert!(self.payload.len() == 2, "word transfer needs a 2-byte payload")
            }
            Protocol::BlockData | Protocol::I2cBlockData => {
                debug_assert!(
                    self.payload.len() <= BLOCK_MAX,
                    "block transfer limited to {} bytes",
                    BLOCK_MAX
                )
            }
        }
    }
}

/// Issues the address-select and transfer ioctls against one open device
/// file. Implementations must not retry; callers see exactly what the
/// kernel returned.
pub trait SmbusPort: Send + Sync {
    /// Select the 7-bit slave address subsequent transfers on `file` talk
    /// to. Must precede any data ioctl on that file.
    fn set_slave_address(&self, file: &dyn SysFile, address: u8) -> Result<(), I2cError>;

    /// Execute one transaction, returning the number of payload bytes
    /// moved (for block reads: as reported by the peer's length prefix).
    fn transfer(&self, file: &dyn SysFile, txn: &mut Transaction<'_>) -> Result<usize, I2cError>;
}

impl std::fmt::Debug for dyn SmbusPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SmbusPort")
    }
}
