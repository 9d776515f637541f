//! Deterministic SMBus port double.
//!
//! Records the exact ioctl sequence a caller issued — request, device
//! path, slave address, register, protocol, written payload — and serves
//! caller-substituted byte content for reads, or errno-shaped failures for
//! either ioctl. This is how chip driver tests simulate hardware (ADC
//! conversions, sensor coefficient decoding) without real devices.

use std::io;
use std::sync::{Mutex, MutexGuard};

use super::{Direction, Protocol, SmbusPort, Transaction};
use crate::fs::SysFile;
use crate::i2c::I2cError;

#[derive(Debug, Default)]
struct State {
    last_request: Option<libc::c_ulong>,
    last_path: Option<String>,
    address: Option<u8>,
    last_register: Option<u8>,
    last_protocol: Option<Protocol>,
    last_direction: Option<Direction>,
    written: Vec<u8>,
    read_data: Vec<u8>,
    address_errno: Option<i32>,
    transfer_errno: Option<i32>,
}

/// In-memory stand-in for [`LinuxSmbus`].
///
/// [`LinuxSmbus`]: super::LinuxSmbus
#[derive(Debug, Default)]
pub struct MockSmbus {
    state: Mutex<State>,
}

impl MockSmbus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bytes the next reads will return, regardless of protocol. Reads
    /// consume from the front, sized by the transaction's protocol.
    pub fn set_read_data(&self, data: &[u8]) {
        self.state().read_data = data.to_vec();
    }

    /// Fail the next address-select ioctls with the given errno.
    pub fn inject_address_error(&self, errno: i32) {
        self.state().address_errno = Some(errno);
    }

    /// Fail the next transfer ioctls with the given errno.
    pub fn inject_transfer_error(&self, errno: i32) {
        self.state().transfer_errno = Some(errno);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.address_errno = None;
        state.transfer_errno = None;
    }

    /// The slave address most recently selected.
    pub fn address(&self) -> Option<u8> {
        self.state().address
    }

    /// The ioctl request most recently issued.
    pub fn last_request(&self) -> Option<libc::c_ulong> {
        self.state().last_request
    }

    /// The device file path most recently targeted.
    pub fn last_path(&self) -> Option<String> {
        self.state().last_path.clone()
    }

    pub fn last_register(&self) -> Option<u8> {
        self.state().last_register
    }

    pub fn last_protocol(&self) -> Option<Protocol> {
        self.state().last_protocol
    }

    pub fn last_direction(&self) -> Option<Direction> {
        self.state().last_direction
    }

    /// All payload bytes written so far, in issue order.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn clear_written(&self) {
        self.state().written.clear();
    }
}

impl SmbusPort for MockSmbus {
    fn set_slave_address(&self, file: &dyn SysFile, address: u8) -> Result<(), I2cError> {
        let mut state = self.state();
        state.last_request = Some(super::I2C_SLAVE);
        state.last_path = Some(file.path().to_string());
        if let Some(errno) = state.address_errno {
            return Err(I2cError::Address {
                address,
                source: io::Error::from_raw_os_error(errno),
            });
        }
        state.address = Some(address);
        Ok(())
    }

    fn transfer(&self, file: &dyn SysFile, txn: &mut Transaction<'_>) -> Result<usize, I2cError> {
        let mut state = self.state();
        state.last_request = Some(super::I2C_SMBUS);
        state.last_path = Some(file.path().to_string());
        state.last_register = Some(txn.register);
        state.last_protocol = Some(txn.protocol);
        state.last_direction = Some(txn.direction);

        if let Some(errno) = state.transfer_errno {
            return Err(I2cError::Transfer {
                source: io::Error::from_raw_os_error(errno),
            });
        }

        match txn.direction {
            Direction::Write => {
                if txn.protocol == Protocol::Byte {
                    // The value travels in the register slot.
                    state.written.push(txn.register);
                } else {
                    let len = txn.protocol.payload_len(txn.payload.len());
                    state.written.extend_from_slice(&txn.payload[..len]);
                }
                Ok(txn.protocol.payload_len(txn.payload.len()))
            }
            Direction::Read => {
                let wanted = txn.protocol.payload_len(txn.payload.len());
                let available = state.read_data.len().min(wanted);
                let served: Vec<u8> = state.read_data.drain(..available).collect();
                txn.payload[..available].copy_from_slice(&served);
                if txn.protocol.is_block() {
                    Ok(available)
                } else {
                    Ok(wanted)
                }
            }
        }
    }
}
