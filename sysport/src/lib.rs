//! Hardware I/O access layer for Linux userspace device drivers.
//!
//! Drivers exchange bytes with physical chips over two system-level
//! surfaces — I2C character devices (via ioctl/SMBus framing) and
//! sysfs-exported PWM/GPIO pins — without re-implementing file-descriptor
//! lifecycle, ioctl payload packing, or sysfs race handling. Every
//! operation is a synchronous, blocking system transaction: no scheduler,
//! no batching, no automatic retries.
//!
//! The [`Accesser`] is the process-wide entry point. Built against the
//! real backends it talks to `/dev/i2c-N` and `/sys/class/...`; built
//! against the mock backends it drives the same code paths entirely
//! in memory, which is how driver test suites simulate hardware:
//!
//! ```
//! use sysport::gpio::{Direction, Level};
//! use sysport::Accesser;
//!
//! let (accesser, fs, _smbus) = Accesser::with_mocks(&[
//!     "/sys/class/gpio/export",
//!     "/sys/class/gpio/unexport",
//!     "/sys/class/gpio/gpio17/direction",
//!     "/sys/class/gpio/gpio17/value",
//! ]);
//!
//! let mut pin = accesser.digital_pin(17);
//! pin.export()?;
//! pin.set_direction(Direction::Out)?;
//! pin.write(Level::High)?;
//! assert_eq!(fs.contents("/sys/class/gpio/gpio17/value").as_deref(), Some("1"));
//! # Ok::<(), sysport::Error>(())
//! ```

pub mod accesser;
pub mod error;
pub mod fs;
pub mod gpio;
pub mod i2c;
pub mod pwm;
pub mod smbus;
pub mod tracing;

pub use accesser::{Accesser, AccesserBuilder};
pub use error::{AggregateError, Error, Result};
pub use gpio::DigitalPin;
pub use i2c::I2cConnection;
pub use pwm::PwmPin;
