//! Sysfs digital pin state machine.
//!
//! A GPIO line moves `Unexported ⇄ Exported` through the plain-text
//! control files `/sys/class/gpio/{export,unexport}` and
//! `/sys/class/gpio/gpioN/{direction,value}`.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::error::OsCategory;
use crate::fs::Filesystem;
use crate::tracing::prelude::*;

pub const GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Logic level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for bool {
    fn from(value: Level) -> Self {
        matches!(value, Level::High)
    }
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("export failed for line {line}: {source}")]
    Export { line: u32, source: io::Error },

    #[error("unexport failed for line {line}: {source}")]
    Unexport { line: u32, source: io::Error },

    /// File read/write/parse failure, carrying the failing path: many
    /// pins share similarly-named files and misrouting must be
    /// debuggable.
    #[error("{path}: {source}")]
    PinIo { path: String, source: io::Error },
}

/// One digital line under `/sys/class/gpio`.
pub struct DigitalPin {
    fs: Arc<dyn Filesystem>,
    line: u32,
    exported: bool,
}

impl DigitalPin {
    pub fn new(fs: Arc<dyn Filesystem>, line: u32) -> Self {
        Self {
            fs,
            line,
            exported: false,
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn exported(&self) -> bool {
        self.exported
    }

    /// Request kernel ownership of the line. Exporting an already-exported
    /// pin is not an error.
    pub fn export(&mut self) -> Result<(), GpioError> {
        let path = format!("{GPIO_ROOT}/export");
        match self.fs.write_file(&path, self.line.to_string().as_bytes()) {
            Ok(_) => {}
            Err(source) if OsCategory::of(&source).is_already_owned() => {
                debug!(line = self.line, "GPIO line already exported");
            }
            Err(source) => {
                return Err(GpioError::Export {
                    line: self.line,
                    source,
                })
            }
        }
        self.exported = true;
        Ok(())
    }

    /// Release kernel ownership. Busy is tolerated: another pin-manager
    /// instance may own the line.
    pub fn unexport(&mut self) -> Result<(), GpioError> {
        let path = format!("{GPIO_ROOT}/unexport");
        match self.fs.write_file(&path, self.line.to_string().as_bytes()) {
            Ok(_) => {}
            Err(source) if OsCategory::of(&source).is_already_owned() => {
                debug!(line = self.line, "GPIO line busy on unexport");
            }
            Err(source) => {
                return Err(GpioError::Unexport {
                    line: self.line,
                    source,
                })
            }
        }
        self.exported = false;
        Ok(())
    }

    pub fn set_direction(&mut self, direction: Direction) -> Result<(), GpioError> {
        self.write_attr("direction", direction.as_str())
    }

    pub fn direction(&self) -> Result<Direction, GpioError> {
        let path = self.attr_path("direction");
        let raw = self.read_attr(&path)?;
        match raw.trim() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(invalid_data(path, format!("unexpected direction {other:?}"))),
        }
    }

    pub fn write(&mut self, level: Level) -> Result<(), GpioError> {
        let value = if bool::from(level) { "1" } else { "0" };
        self.write_attr("value", value)
    }

    pub fn read(&self) -> Result<Level, GpioError> {
        let path = self.attr_path("value");
        let raw = self.read_attr(&path)?;
        match raw.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(invalid_data(path, format!("unexpected pin value {other:?}"))),
        }
    }

    fn attr_path(&self, attr: &str) -> String {
        format!("{GPIO_ROOT}/gpio{}/{}", self.line, attr)
    }

    fn read_attr(&self, path: &str) -> Result<String, GpioError> {
        self.fs.read_file(path).map_err(|source| GpioError::PinIo {
            path: path.to_string(),
            source,
        })
    }

    fn write_attr(&self, attr: &str, value: &str) -> Result<(), GpioError> {
        let path = self.attr_path(attr);
        self.fs
            .write_file(&path, value.as_bytes())
            .map(|_| ())
            .map_err(|source| GpioError::PinIo { path, source })
    }
}

fn invalid_data(path: String, message: String) -> GpioError {
    GpioError::PinIo {
        path,
        source: io::Error::new(io::ErrorKind::InvalidData, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFilesystem;

    fn pin_paths(line: u32) -> Vec<String> {
        vec![
            format!("{GPIO_ROOT}/export"),
            format!("{GPIO_ROOT}/unexport"),
            format!("{GPIO_ROOT}/gpio{line}/direction"),
            format!("{GPIO_ROOT}/gpio{line}/value"),
        ]
    }

    fn test_pin(line: u32) -> (DigitalPin, Arc<MockFilesystem>) {
        let fs = Arc::new(MockFilesystem::new(&pin_paths(line)));
        let pin = DigitalPin::new(fs.clone(), line);
        (pin, fs)
    }

    #[test]
    fn test_lifecycle_round_trip() {
        let (mut pin, fs) = test_pin(13);

        pin.export().unwrap();
        assert!(pin.exported());
        assert_eq!(fs.contents(&format!("{GPIO_ROOT}/export")).as_deref(), Some("13"));

        pin.set_direction(Direction::Out).unwrap();
        assert_eq!(
            fs.contents(&format!("{GPIO_ROOT}/gpio13/direction")).as_deref(),
            Some("out")
        );
        assert_eq!(pin.direction().unwrap(), Direction::Out);

        pin.write(Level::High).unwrap();
        assert_eq!(
            fs.contents(&format!("{GPIO_ROOT}/gpio13/value")).as_deref(),
            Some("1")
        );
        assert_eq!(pin.read().unwrap(), Level::High);

        pin.write(Level::Low).unwrap();
        assert_eq!(pin.read().unwrap(), Level::Low);

        pin.unexport().unwrap();
        assert!(!pin.exported());
        assert_eq!(
            fs.contents(&format!("{GPIO_ROOT}/unexport")).as_deref(),
            Some("13")
        );
    }

    #[test]
    fn test_export_tolerates_busy_and_already_exists() {
        for errno in [libc::EBUSY, libc::EEXIST] {
            let (mut pin, fs) = test_pin(4);
            fs.inject_write_error(&format!("{GPIO_ROOT}/export"), errno);

            // No error indicates the line was already exported.
            pin.export().unwrap();
            assert!(pin.exported());
        }
    }

    #[test]
    fn test_export_error_names_line() {
        let (mut pin, fs) = test_pin(4);
        fs.inject_write_error(&format!("{GPIO_ROOT}/export"), libc::EFAULT);

        let err = pin.export().unwrap_err();
        assert!(matches!(err, GpioError::Export { line: 4, .. }));
        let text = err.to_string();
        assert!(text.contains("line 4"), "unexpected message: {text}");
    }

    #[test]
    fn test_unexport_tolerates_busy() {
        let (mut pin, fs) = test_pin(4);
        pin.export().unwrap();
        fs.inject_write_error(&format!("{GPIO_ROOT}/unexport"), libc::EBUSY);

        pin.unexport().unwrap();
        assert!(!pin.exported());
    }

    #[test]
    fn test_missing_value_file_carries_path() {
        let (pin, fs) = test_pin(17);
        fs.remove(&format!("{GPIO_ROOT}/gpio17/value"));

        let err = pin.read().unwrap_err();
        let text = err.to_string();
        assert!(
            text.contains("/sys/class/gpio/gpio17/value"),
            "unexpected message: {text}"
        );
    }

    #[test]
    fn test_garbage_value_is_invalid_data() {
        let (pin, fs) = test_pin(17);
        fs.set_contents(&format!("{GPIO_ROOT}/gpio17/value"), "banana");

        let err = pin.read().unwrap_err();
        match err {
            GpioError::PinIo { path, source } => {
                assert!(path.ends_with("gpio17/value"));
                assert_eq!(source.kind(), io::ErrorKind::InvalidData);
            }
            other => panic!("expected PinIo, got {other:?}"),
        }
    }

    #[test]
    fn test_level_bool_conversions() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false), Level::Low);
        assert!(bool::from(Level::High));
        assert!(!bool::from(Level::Low));
    }
}
