//! Process-wide facade selecting real or mock backends and vending
//! bus/pin handles.
//!
//! Backend selection is deliberately global-but-explicit: the Accesser is
//! built once at process start with its configuration (filesystem, SMBus
//! port, board bus set) and every handle created afterward holds an
//! explicit reference to that configuration. It is never toggled
//! mid-flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AggregateError;
use crate::fs::{Filesystem, MockFilesystem, NativeFilesystem};
use crate::gpio::DigitalPin;
use crate::i2c::{I2cConnection, I2cDevice, I2cError};
use crate::pwm::PwmPin;
use crate::smbus::{LinuxSmbus, MockSmbus, SmbusPort};
use crate::tracing::prelude::*;

/// Builder for an [`Accesser`]; unset backends default to the real ones.
#[derive(Default)]
pub struct AccesserBuilder {
    fs: Option<Arc<dyn Filesystem>>,
    smbus: Option<Arc<dyn SmbusPort>>,
    i2c_buses: Option<Vec<u32>>,
}

impl AccesserBuilder {
    pub fn filesystem(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn smbus(mut self, port: Arc<dyn SmbusPort>) -> Self {
        self.smbus = Some(port);
        self
    }

    /// The board's valid I2C bus numbers. Without a list, any bus is
    /// accepted; platform glue that knows the board should inject one.
    pub fn i2c_buses(mut self, buses: impl IntoIterator<Item = u32>) -> Self {
        self.i2c_buses = Some(buses.into_iter().collect());
        self
    }

    pub fn build(self) -> Accesser {
        Accesser {
            fs: self.fs.unwrap_or_else(|| Arc::new(NativeFilesystem::new())),
            smbus: self.smbus.unwrap_or_else(|| Arc::new(LinuxSmbus::new())),
            i2c_buses: self.i2c_buses,
            devices: Mutex::new(HashMap::new()),
        }
    }
}

/// Single entry point vending I2C connections and sysfs pins, backed by
/// either real syscalls/files or their mock equivalents.
pub struct Accesser {
    fs: Arc<dyn Filesystem>,
    smbus: Arc<dyn SmbusPort>,
    i2c_buses: Option<Vec<u32>>,
    devices: Mutex<HashMap<u32, Arc<Mutex<I2cDevice>>>>,
}

impl Default for Accesser {
    fn default() -> Self {
        Self::new()
    }
}

impl Accesser {
    /// An accesser against the real filesystem and ioctl surface.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> AccesserBuilder {
        AccesserBuilder::default()
    }

    /// An accesser wired to fresh mock backends, handed back alongside
    /// them so tests can seed content and inspect traffic.
    pub fn with_mocks<S: AsRef<str>>(
        paths: &[S],
    ) -> (Self, Arc<MockFilesystem>, Arc<MockSmbus>) {
        let fs = Arc::new(MockFilesystem::new(paths));
        let smbus = Arc::new(MockSmbus::new());
        let accesser = Self::builder()
            .filesystem(fs.clone())
            .smbus(smbus.clone())
            .build();
        (accesser, fs, smbus)
    }

    /// The filesystem backend handles are bound to.
    pub fn filesystem(&self) -> Arc<dyn Filesystem> {
        self.fs.clone()
    }

    /// A connection to the chip at `address` on `bus`.
    ///
    /// The bus must be in the board's valid set when one was configured.
    /// One device file per bus is opened and shared by reference across
    /// connections; the Accesser remains its sole owner.
    pub fn i2c_connection(&self, address: u8, bus: u32) -> Result<I2cConnection, I2cError> {
        if let Some(allowed) = &self.i2c_buses {
            if !allowed.contains(&bus) {
                return Err(I2cError::UnsupportedBus { bus });
            }
        }

        let mut devices = self.devices();
        let device = match devices.get(&bus) {
            Some(device) => device.clone(),
            None => {
                let device = Arc::new(Mutex::new(I2cDevice::open(
                    self.fs.as_ref(),
                    self.smbus.clone(),
                    bus,
                )?));
                devices.insert(bus, device.clone());
                device
            }
        };

        debug!(bus, address = %format!("0x{address:02x}"), "vending I2C connection");
        Ok(I2cConnection::new(device, bus, address))
    }

    /// A PWM channel under the given controller directory, bound to the
    /// active filesystem backend. Platform policies (fixed period,
    /// polarity spelling) chain onto the returned pin.
    pub fn pwm_pin(&self, chip_path: &str, channel: u32) -> PwmPin {
        PwmPin::new(self.fs.clone(), chip_path, channel)
    }

    /// A digital line, bound to the active filesystem backend.
    pub fn digital_pin(&self, line: u32) -> DigitalPin {
        DigitalPin::new(self.fs.clone(), line)
    }

    /// Release everything the Accesser owns. Every release is attempted
    /// even if earlier ones fail; failures are collected, never swallowed.
    pub fn finalize(&self) -> Result<(), AggregateError> {
        let mut aggregate = AggregateError::new();
        let mut devices = self.devices();
        for (bus, device) in devices.drain() {
            trace!(bus, "releasing I2C device");
            let mut device = device.lock().unwrap_or_else(|e| e.into_inner());
            aggregate.record(device.close());
        }
        aggregate.into_result()
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<u32, Arc<Mutex<I2cDevice>>>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::GPIO_ROOT;

    #[test]
    fn test_allowlisted_buses_vend_connections() {
        let fs = Arc::new(MockFilesystem::new(&["/dev/i2c-1", "/dev/i2c-6"]));
        let accesser = Accesser::builder()
            .filesystem(fs)
            .smbus(Arc::new(MockSmbus::new()))
            .i2c_buses([1, 6])
            .build();

        assert!(accesser.i2c_connection(0x60, 1).is_ok());
        assert!(accesser.i2c_connection(0x60, 6).is_ok());

        let err = accesser.i2c_connection(0x60, 2).unwrap_err();
        assert!(matches!(err, I2cError::UnsupportedBus { bus: 2 }));
    }

    #[test]
    fn test_without_allowlist_any_bus_goes() {
        let (accesser, _fs, _smbus) = Accesser::with_mocks(&["/dev/i2c-3"]);
        assert!(accesser.i2c_connection(0x10, 3).is_ok());
    }

    #[test]
    fn test_connections_share_one_device_per_bus() {
        let (accesser, _fs, _smbus) = Accesser::with_mocks(&["/dev/i2c-1"]);

        let mut first = accesser.i2c_connection(0x20, 1).unwrap();
        let mut second = accesser.i2c_connection(0x21, 1).unwrap();

        // Closing through one handle releases the single shared file.
        first.close().unwrap();
        let err = second.read_byte().unwrap_err();
        assert!(matches!(err, I2cError::Closed));
    }

    #[test]
    fn test_finalize_closes_vended_devices() {
        let (accesser, _fs, _smbus) = Accesser::with_mocks(&["/dev/i2c-1"]);
        let mut conn = accesser.i2c_connection(0x20, 1).unwrap();

        accesser.finalize().unwrap();
        let err = conn.read_byte().unwrap_err();
        assert!(matches!(err, I2cError::Closed));

        // A second finalize has nothing left to do and still succeeds.
        accesser.finalize().unwrap();
    }

    #[test]
    fn test_teardown_attempts_all_and_reports_each_failure() {
        // Adaptor-style teardown over independently-owned pins: releases
        // on chips 1 and 2 fail, everything else must still be attempted.
        let mut paths: Vec<String> = vec![
            format!("{GPIO_ROOT}/export"),
            format!("{GPIO_ROOT}/unexport"),
            format!("{GPIO_ROOT}/gpio7/direction"),
            format!("{GPIO_ROOT}/gpio7/value"),
        ];
        for chip in 0..3 {
            paths.push(format!("/sys/class/pwm/pwmchip{chip}/export"));
            paths.push(format!("/sys/class/pwm/pwmchip{chip}/unexport"));
            for attr in ["enable", "period", "duty_cycle", "polarity"] {
                paths.push(format!("/sys/class/pwm/pwmchip{chip}/pwm0/{attr}"));
            }
        }
        let (accesser, fs, _smbus) = Accesser::with_mocks(&paths);

        let mut pwm_pins: Vec<_> = (0..3)
            .map(|chip| accesser.pwm_pin(&format!("/sys/class/pwm/pwmchip{chip}"), 0))
            .collect();
        let mut gpio_pin = accesser.digital_pin(7);
        for pin in &mut pwm_pins {
            pin.export().unwrap();
        }
        gpio_pin.export().unwrap();

        fs.inject_write_error("/sys/class/pwm/pwmchip1/unexport", libc::EFAULT);
        fs.inject_write_error("/sys/class/pwm/pwmchip2/unexport", libc::EIO);

        let mut aggregate = AggregateError::new();
        for pin in &mut pwm_pins {
            aggregate.record(pin.unexport());
        }
        aggregate.record(gpio_pin.unexport());

        let err = aggregate.into_result().unwrap_err();
        assert_eq!(err.len(), 2);

        // The non-failing releases all went through.
        assert_eq!(
            fs.contents("/sys/class/pwm/pwmchip0/unexport").as_deref(),
            Some("0")
        );
        assert_eq!(fs.contents(&format!("{GPIO_ROOT}/unexport")).as_deref(), Some("7"));

        let text = err.to_string();
        assert!(text.starts_with("2 release(s) failed"), "unexpected message: {text}");
        assert!(text.contains("channel 0"), "unexpected message: {text}");
    }

    #[test]
    fn test_vended_pins_use_the_mock_backend() {
        let paths = [
            format!("{GPIO_ROOT}/export"),
            format!("{GPIO_ROOT}/unexport"),
            format!("{GPIO_ROOT}/gpio17/direction"),
            format!("{GPIO_ROOT}/gpio17/value"),
        ];
        let (accesser, fs, _smbus) = Accesser::with_mocks(&paths);

        let mut pin = accesser.digital_pin(17);
        pin.export().unwrap();
        pin.set_direction(crate::gpio::Direction::Out).unwrap();
        pin.write(crate::gpio::Level::High).unwrap();

        assert_eq!(
            fs.contents(&format!("{GPIO_ROOT}/gpio17/value")).as_deref(),
            Some("1")
        );
    }
}
