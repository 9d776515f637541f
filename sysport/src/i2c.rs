//! I2C bus device and per-chip connections.
//!
//! An [`I2cDevice`] owns one open `/dev/i2c-N` handle and carries the full
//! SMBus primitive surface. Drivers never hold a device directly; they get
//! an [`I2cConnection`] bound to one (bus, address) pair, with the device
//! shared by reference so several chips on the same bus use one file
//! handle and the Accesser closes it exactly once.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::fs::{Access, Filesystem, SysFile};
use crate::smbus::{Protocol, SmbusPort, Transaction, BLOCK_MAX};
use crate::tracing::prelude::*;

/// I2C and SMBus level failures.
#[derive(Debug, Error)]
pub enum I2cError {
    /// The kernel rejected the address-select ioctl.
    #[error("device address 0x{address:02x} rejected: {source}")]
    Address { address: u8, source: io::Error },

    /// The SMBus data ioctl failed.
    #[error("SMBus transfer failed: {source}")]
    Transfer { source: io::Error },

    #[error("failed to open {path}: {source}")]
    Open { path: String, source: io::Error },

    /// Bus number outside the board's valid set.
    #[error("I2C bus {bus} not supported by this board")]
    UnsupportedBus { bus: u32 },

    /// Operation on a handle whose file was already released.
    #[error("I2C device file already closed")]
    Closed,

    #[error("block payload of {len} bytes exceeds the {BLOCK_MAX}-byte SMBus limit")]
    BlockTooLong { len: usize },
}

/// One open I2C character device.
#[derive(Debug)]
pub struct I2cDevice {
    file: Option<Box<dyn SysFile>>,
    port: Arc<dyn SmbusPort>,
    location: String,
}

impl I2cDevice {
    pub(crate) fn open(
        fs: &dyn Filesystem,
        port: Arc<dyn SmbusPort>,
        bus: u32,
    ) -> Result<Self, I2cError> {
        let location = format!("/dev/i2c-{bus}");
        let file = fs
            .open(&location, Access::ReadWrite)
            .map_err(|source| I2cError::Open {
                path: location.clone(),
                source,
            })?;
        debug!(device = %location, "opened I2C device");
        Ok(Self {
            file: Some(file),
            port,
            location,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Select the slave address subsequent operations talk to.
    pub fn set_address(&mut self, address: u8) -> Result<(), I2cError> {
        let file = self.file.as_deref().ok_or(I2cError::Closed)?;
        self.port.set_slave_address(file, address)
    }

    /// Plain read through the device file; blocks until the kernel
    /// completes or fails, no retries.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, I2cError> {
        let file = self.file.as_deref_mut().ok_or(I2cError::Closed)?;
        file.read(buf)
            .map_err(|source| I2cError::Transfer { source })
    }

    /// Plain write through the device file.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, I2cError> {
        let file = self.file.as_deref_mut().ok_or(I2cError::Closed)?;
        file.write(data)
            .map_err(|source| I2cError::Transfer { source })
    }

    pub fn read_byte(&mut self) -> Result<u8, I2cError> {
        let mut payload = [0u8; 1];
        self.transfer(&mut Transaction::read(Protocol::Byte, 0, &mut payload))?;
        Ok(payload[0])
    }

    pub fn read_byte_data(&mut self, register: u8) -> Result<u8, I2cError> {
        let mut payload = [0u8; 1];
        self.transfer(&mut Transaction::read(
            Protocol::ByteData,
            register,
            &mut payload,
        ))?;
        Ok(payload[0])
    }

    pub fn read_word_data(&mut self, register: u8) -> Result<u16, I2cError> {
        let mut payload = [0u8; 2];
        self.transfer(&mut Transaction::read(
            Protocol::WordData,
            register,
            &mut payload,
        ))?;
        Ok(u16::from_le_bytes(payload))
    }

    /// Read a block, returning how many bytes the peer announced. The
    /// length prefix is handled below this API; `data` receives payload
    /// bytes only.
    pub fn read_block_data(&mut self, register: u8, data: &mut [u8]) -> Result<usize, I2cError> {
        self.transfer(&mut Transaction::read(Protocol::BlockData, register, data))
    }

    pub fn write_byte(&mut self, value: u8) -> Result<(), I2cError> {
        let mut empty: [u8; 0] = [];
        self.transfer(&mut Transaction::write(Protocol::Byte, value, &mut empty))?;
        Ok(())
    }

    pub fn write_byte_data(&mut self, register: u8, value: u8) -> Result<(), I2cError> {
        let mut payload = [value];
        self.transfer(&mut Transaction::write(
            Protocol::ByteData,
            register,
            &mut payload,
        ))?;
        Ok(())
    }

    pub fn write_word_data(&mut self, register: u8, value: u16) -> Result<(), I2cError> {
        let mut payload = value.to_le_bytes();
        self.transfer(&mut Transaction::write(
            Protocol::WordData,
            register,
            &mut payload,
        ))?;
        Ok(())
    }

    pub fn write_block_data(&mut self, register: u8, data: &[u8]) -> Result<(), I2cError> {
        if data.len() > BLOCK_MAX {
            return Err(I2cError::BlockTooLong { len: data.len() });
        }
        let mut payload = [0u8; BLOCK_MAX];
        payload[..data.len()].copy_from_slice(data);
        self.transfer(&mut Transaction::write(
            Protocol::BlockData,
            register,
            &mut payload[..data.len()],
        ))?;
        Ok(())
    }

    /// Release the device file. Idempotent: the handle is dropped exactly
    /// once and later calls are no-ops.
    pub fn close(&mut self) -> Result<(), I2cError> {
        if let Some(file) = self.file.take() {
            debug!(device = %self.location, "closing I2C device");
            drop(file);
        }
        Ok(())
    }

    fn transfer(&mut self, txn: &mut Transaction<'_>) -> Result<usize, I2cError> {
        let file = self.file.as_deref().ok_or(I2cError::Closed)?;
        self.port.transfer(file, txn)
    }
}

/// Driver-facing handle bound to exactly one (bus, 7-bit address) pair for
/// its lifetime.
///
/// The slave address is re-selected before every operation, so connections
/// on different addresses can share one bus device. A connection is not
/// safe for concurrent use from multiple callers without external
/// serialization; the intended usage is one connection per driver
/// instance, the driver owning call-ordering.
#[derive(Debug)]
pub struct I2cConnection {
    device: Arc<Mutex<I2cDevice>>,
    bus: u32,
    address: u8,
}

impl I2cConnection {
    pub(crate) fn new(device: Arc<Mutex<I2cDevice>>, bus: u32, address: u8) -> Self {
        Self {
            device,
            bus,
            address,
        }
    }

    pub fn bus(&self) -> u32 {
        self.bus
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    fn device(&self) -> MutexGuard<'_, I2cDevice> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.read(buf)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.write(data)
    }

    /// Write `tx` then read exactly `rx.len()` bytes, for chips with a
    /// "select register then read" protocol.
    pub fn read_command_data(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.write(tx)?;
        let n = device.read(rx)?;
        if n != rx.len() {
            return Err(I2cError::Transfer {
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short read: {} of {} bytes", n, rx.len()),
                ),
            });
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8, I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.read_byte()
    }

    pub fn read_byte_data(&mut self, register: u8) -> Result<u8, I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.read_byte_data(register)
    }

    pub fn read_word_data(&mut self, register: u8) -> Result<u16, I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.read_word_data(register)
    }

    pub fn read_block_data(&mut self, register: u8, data: &mut [u8]) -> Result<usize, I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.read_block_data(register, data)
    }

    pub fn write_byte(&mut self, value: u8) -> Result<(), I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.write_byte(value)
    }

    pub fn write_byte_data(&mut self, register: u8, value: u8) -> Result<(), I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.write_byte_data(register, value)
    }

    pub fn write_word_data(&mut self, register: u8, value: u16) -> Result<(), I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.write_word_data(register, value)
    }

    pub fn write_block_data(&mut self, register: u8, data: &[u8]) -> Result<(), I2cError> {
        let mut device = self.device();
        device.set_address(self.address)?;
        device.write_block_data(register, data)
    }

    /// Release the shared device file. Idempotent; closing twice neither
    /// fails nor double-releases the handle.
    pub fn close(&mut self) -> Result<(), I2cError> {
        self.device().close()
    }
}
