//! Sysfs PWM channel state machine.
//!
//! A channel moves `Unexported → Exported ⇄ Enabled` through plain-text
//! control files under its controller's sysfs directory:
//! `{chip}/export`, `{chip}/unexport`, `{chip}/pwmN/{period,duty_cycle,
//! polarity,enable}`. All values are nanoseconds or enum text.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::error::OsCategory;
use crate::fs::Filesystem;
use crate::tracing::prelude::*;

/// Kernel spelling of the polarity values. Some platforms deviate; the
/// identifiers are injectable per pin.
pub const POLARITY_NORMAL: &str = "normal";
pub const POLARITY_INVERSED: &str = "inversed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Normal,
    Inverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmState {
    Unexported,
    Exported,
    Enabled,
}

#[derive(Debug, Error)]
pub enum PwmError {
    #[error("export failed for channel {channel}: {source}")]
    Export { channel: u32, source: io::Error },

    #[error("unexport failed for channel {channel}: {source}")]
    Unexport { channel: u32, source: io::Error },

    /// File read/write/parse failure, carrying the failing path: many
    /// channels share similarly-named files and misrouting must be
    /// debuggable.
    #[error("{path}: {source}")]
    PinIo { path: String, source: io::Error },

    /// The period file holds no usable value yet.
    #[error("period not set for channel {channel}")]
    PeriodNotSet { channel: u32 },

    #[error("duty cycle {duty}ns exceeds period {period}ns")]
    DutyCycleExceedsPeriod { duty: u32, period: u32 },

    #[error("cannot change polarity while channel {channel} is enabled")]
    PolarityWhileEnabled { channel: u32 },

    /// The controller fixes the period; per-channel changes are refused
    /// instead of silently accepting an unusable value.
    #[error("period of channel {channel} is fixed by the controller")]
    PeriodNotConfigurable { channel: u32 },
}

/// One PWM channel behind a sysfs controller directory.
pub struct PwmPin {
    fs: Arc<dyn Filesystem>,
    chip_path: String,
    channel: u32,
    exported: bool,
    enabled: bool,
    period_adjustable: bool,
    polarity_normal: String,
    polarity_inverted: String,
}

impl PwmPin {
    /// A channel under `chip_path` (e.g. `/sys/class/pwm/pwmchip0`),
    /// initially unexported, with the kernel polarity spelling and an
    /// adjustable period.
    pub fn new(fs: Arc<dyn Filesystem>, chip_path: impl Into<String>, channel: u32) -> Self {
        Self {
            fs,
            chip_path: chip_path.into(),
            channel,
            exported: false,
            enabled: false,
            period_adjustable: true,
            polarity_normal: POLARITY_NORMAL.to_string(),
            polarity_inverted: POLARITY_INVERSED.to_string(),
        }
    }

    /// Override the polarity identifiers for platforms that spell them
    /// differently.
    pub fn with_polarity_idents(
        mut self,
        normal: impl Into<String>,
        inverted: impl Into<String>,
    ) -> Self {
        self.polarity_normal = normal.into();
        self.polarity_inverted = inverted.into();
        self
    }

    /// Mark the period as fixed at the controller level; `set_period`
    /// will be refused. Injected by the pin owner on platforms where the
    /// overall period is not per-channel.
    pub fn with_fixed_period(mut self) -> Self {
        self.period_adjustable = false;
        self
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn state(&self) -> PwmState {
        match (self.exported, self.enabled) {
            (false, _) => PwmState::Unexported,
            (true, false) => PwmState::Exported,
            (true, true) => PwmState::Enabled,
        }
    }

    /// Request kernel ownership of the channel. "Already exists"/busy is
    /// success: the state is externally consistent either way.
    pub fn export(&mut self) -> Result<(), PwmError> {
        let path = format!("{}/export", self.chip_path);
        match self.fs.write_file(&path, self.channel.to_string().as_bytes()) {
            Ok(_) => {}
            Err(source) if OsCategory::of(&source).is_already_owned() => {
                debug!(channel = self.channel, "PWM channel already exported");
            }
            Err(source) => {
                return Err(PwmError::Export {
                    channel: self.channel,
                    source,
                })
            }
        }
        self.exported = true;
        Ok(())
    }

    /// Release kernel ownership. Busy is tolerated: another pin-manager
    /// instance may own the channel.
    pub fn unexport(&mut self) -> Result<(), PwmError> {
        let path = format!("{}/unexport", self.chip_path);
        match self.fs.write_file(&path, self.channel.to_string().as_bytes()) {
            Ok(_) => {}
            Err(source) if OsCategory::of(&source).is_already_owned() => {
                debug!(channel = self.channel, "PWM channel busy on unexport");
            }
            Err(source) => {
                return Err(PwmError::Unexport {
                    channel: self.channel,
                    source,
                })
            }
        }
        self.exported = false;
        self.enabled = false;
        Ok(())
    }

    /// The software record of the enable state, not a hardware re-read.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, on: bool) -> Result<(), PwmError> {
        let value = if on { "1" } else { "0" };
        self.write_attr("enable", value)?;
        self.enabled = on;
        Ok(())
    }

    /// Current period in nanoseconds. A period may be read before ever
    /// being set; an empty or zero file is an explicit "not set" failure,
    /// never a silent 0.
    pub fn period(&self) -> Result<u32, PwmError> {
        match self.read_numeric_attr("period")? {
            Some(ns) if ns > 0 => Ok(ns),
            _ => Err(PwmError::PeriodNotSet {
                channel: self.channel,
            }),
        }
    }

    pub fn set_period(&mut self, ns: u32) -> Result<(), PwmError> {
        if !self.period_adjustable {
            return Err(PwmError::PeriodNotConfigurable {
                channel: self.channel,
            });
        }
        self.write_attr("period", &ns.to_string())
    }

    /// Current duty cycle in nanoseconds; 0 if never set.
    pub fn duty_cycle(&self) -> Result<u32, PwmError> {
        Ok(self.read_numeric_attr("duty_cycle")?.unwrap_or(0))
    }

    /// Checked against the currently-set period before any file write, so
    /// an invalid call never partially mutates hardware state.
    pub fn set_duty_cycle(&mut self, ns: u32) -> Result<(), PwmError> {
        let period = self.period()?;
        if ns > period {
            return Err(PwmError::DutyCycleExceedsPeriod { duty: ns, period });
        }
        self.write_attr("duty_cycle", &ns.to_string())
    }

    pub fn polarity(&self) -> Result<Polarity, PwmError> {
        let path = self.attr_path("polarity");
        let raw = self.read_attr(&path)?;
        let value = raw.trim();
        if value == self.polarity_normal {
            Ok(Polarity::Normal)
        } else if value == self.polarity_inverted {
            Ok(Polarity::Inverted)
        } else {
            Err(PwmError::PinIo {
                path,
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected polarity value {value:?}"),
                ),
            })
        }
    }

    /// Refused while enabled, judged purely from the software record:
    /// enabling followed immediately by a polarity query may race slow
    /// sysfs propagation.
    pub fn set_polarity(&mut self, polarity: Polarity) -> Result<(), PwmError> {
        if self.enabled {
            return Err(PwmError::PolarityWhileEnabled {
                channel: self.channel,
            });
        }
        let ident = match polarity {
            Polarity::Normal => self.polarity_normal.clone(),
            Polarity::Inverted => self.polarity_inverted.clone(),
        };
        self.write_attr("polarity", &ident)
    }

    fn attr_path(&self, attr: &str) -> String {
        format!("{}/pwm{}/{}", self.chip_path, self.channel, attr)
    }

    fn read_attr(&self, path: &str) -> Result<String, PwmError> {
        self.fs.read_file(path).map_err(|source| PwmError::PinIo {
            path: path.to_string(),
            source,
        })
    }

    fn read_numeric_attr(&self, attr: &str) -> Result<Option<u32>, PwmError> {
        let path = self.attr_path(attr);
        let raw = self.read_attr(&path)?;
        let value = raw.trim();
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse::<u32>()
            .map(Some)
            .map_err(|e| PwmError::PinIo {
                path,
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            })
    }

    fn write_attr(&self, attr: &str, value: &str) -> Result<(), PwmError> {
        let path = self.attr_path(attr);
        self.fs
            .write_file(&path, value.as_bytes())
            .map(|_| ())
            .map_err(|source| PwmError::PinIo { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFilesystem;

    const CHIP: &str = "/sys/class/pwm/pwmchip0";

    fn pin_paths() -> Vec<String> {
        let mut paths = vec![format!("{CHIP}/export"), format!("{CHIP}/unexport")];
        for attr in ["enable", "period", "duty_cycle", "polarity"] {
            paths.push(format!("{CHIP}/pwm10/{attr}"));
        }
        paths
    }

    fn test_pin() -> (PwmPin, Arc<MockFilesystem>) {
        let fs = Arc::new(MockFilesystem::new(&pin_paths()));
        let pin = PwmPin::new(fs.clone(), CHIP, 10);
        (pin, fs)
    }

    #[test]
    fn test_lifecycle_round_trip() {
        let (mut pin, fs) = test_pin();
        assert_eq!(pin.state(), PwmState::Unexported);

        pin.export().unwrap();
        assert_eq!(pin.state(), PwmState::Exported);
        assert_eq!(fs.contents(&format!("{CHIP}/export")).as_deref(), Some("10"));

        pin.set_polarity(Polarity::Inverted).unwrap();
        assert_eq!(
            fs.contents(&format!("{CHIP}/pwm10/polarity")).as_deref(),
            Some("inversed")
        );
        assert_eq!(pin.polarity().unwrap(), Polarity::Inverted);

        pin.set_enabled(true).unwrap();
        assert_eq!(pin.state(), PwmState::Enabled);
        assert_eq!(
            fs.contents(&format!("{CHIP}/pwm10/enable")).as_deref(),
            Some("1")
        );

        pin.set_enabled(false).unwrap();
        pin.unexport().unwrap();
        assert_eq!(pin.state(), PwmState::Unexported);
        assert_eq!(
            fs.contents(&format!("{CHIP}/unexport")).as_deref(),
            Some("10")
        );
    }

    #[test]
    fn test_export_tolerates_busy() {
        let (mut pin, fs) = test_pin();
        fs.inject_write_error(&format!("{CHIP}/export"), libc::EBUSY);

        // No error indicates the channel was already exported.
        pin.export().unwrap();
        assert_eq!(pin.state(), PwmState::Exported);
    }

    #[test]
    fn test_export_tolerates_already_exists() {
        let (mut pin, fs) = test_pin();
        fs.inject_write_error(&format!("{CHIP}/export"), libc::EEXIST);

        pin.export().unwrap();
    }

    #[test]
    fn test_export_error_names_channel() {
        let (mut pin, fs) = test_pin();
        fs.inject_write_error(&format!("{CHIP}/export"), libc::EFAULT);

        let err = pin.export().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("channel 10"), "unexpected message: {text}");
        assert!(matches!(err, PwmError::Export { channel: 10, .. }));
        assert_eq!(pin.state(), PwmState::Unexported);
    }

    #[test]
    fn test_unexport_tolerates_busy() {
        let (mut pin, fs) = test_pin();
        pin.export().unwrap();
        fs.inject_write_error(&format!("{CHIP}/unexport"), libc::EBUSY);

        pin.unexport().unwrap();
        assert_eq!(pin.state(), PwmState::Unexported);
    }

    #[test]
    fn test_period_round_trip() {
        let (mut pin, fs) = test_pin();
        pin.export().unwrap();

        fs.set_contents(&format!("{CHIP}/pwm10/period"), "6");
        assert_eq!(pin.period().unwrap(), 6);

        pin.set_period(100_000).unwrap();
        assert_eq!(pin.period().unwrap(), 100_000);
    }

    #[test]
    fn test_unset_period_is_explicit_failure() {
        let (mut pin, _fs) = test_pin();
        pin.export().unwrap();

        assert!(matches!(
            pin.period().unwrap_err(),
            PwmError::PeriodNotSet { channel: 10 }
        ));
        // Zero reads the same as never set.
        let (pin, fs) = test_pin();
        fs.set_contents(&format!("{CHIP}/pwm10/period"), "0");
        assert!(matches!(
            pin.period().unwrap_err(),
            PwmError::PeriodNotSet { .. }
        ));
    }

    #[test]
    fn test_duty_cycle_requires_period() {
        let (mut pin, _fs) = test_pin();
        pin.export().unwrap();

        assert!(matches!(
            pin.set_duty_cycle(100).unwrap_err(),
            PwmError::PeriodNotSet { .. }
        ));
    }

    #[test]
    fn test_duty_cycle_round_trip() {
        let (mut pin, fs) = test_pin();
        pin.export().unwrap();
        pin.set_period(100_000).unwrap();

        assert_eq!(pin.duty_cycle().unwrap(), 0);
        pin.set_duty_cycle(100).unwrap();
        assert_eq!(
            fs.contents(&format!("{CHIP}/pwm10/duty_cycle")).as_deref(),
            Some("100")
        );
        assert_eq!(pin.duty_cycle().unwrap(), 100);
    }

    #[test]
    fn test_duty_cycle_exceeding_period_leaves_state_untouched() {
        let (mut pin, fs) = test_pin();
        pin.export().unwrap();
        pin.set_period(20_000_000).unwrap();
        pin.set_duty_cycle(10_000).unwrap();

        let err = pin.set_duty_cycle(999_999_999).unwrap_err();
        assert!(matches!(
            err,
            PwmError::DutyCycleExceedsPeriod {
                duty: 999_999_999,
                period: 20_000_000
            }
        ));
        // The rejected call never reached the file.
        assert_eq!(
            fs.contents(&format!("{CHIP}/pwm10/duty_cycle")).as_deref(),
            Some("10000")
        );
        assert_eq!(pin.duty_cycle().unwrap(), 10_000);
    }

    #[test]
    fn test_polarity_refused_while_enabled() {
        let (mut pin, fs) = test_pin();
        pin.export().unwrap();
        pin.set_enabled(true).unwrap();

        // The guard judges the software record, not the file content.
        fs.set_contents(&format!("{CHIP}/pwm10/enable"), "0");
        let err = pin.set_polarity(Polarity::Normal).unwrap_err();
        assert!(matches!(err, PwmError::PolarityWhileEnabled { channel: 10 }));

        pin.set_enabled(false).unwrap();
        pin.set_polarity(Polarity::Normal).unwrap();
        assert_eq!(pin.polarity().unwrap(), Polarity::Normal);
    }

    #[test]
    fn test_fixed_period_policy() {
        let fs = Arc::new(MockFilesystem::new(&pin_paths()));
        let mut pin = PwmPin::new(fs.clone(), CHIP, 10).with_fixed_period();
        pin.export().unwrap();

        let err = pin.set_period(10_000_000).unwrap_err();
        assert!(matches!(err, PwmError::PeriodNotConfigurable { channel: 10 }));

        // Externally-set periods still read back fine.
        fs.set_contents(&format!("{CHIP}/pwm10/period"), "20000000");
        assert_eq!(pin.period().unwrap(), 20_000_000);
    }

    #[test]
    fn test_custom_polarity_idents() {
        let fs = Arc::new(MockFilesystem::new(&pin_paths()));
        let mut pin =
            PwmPin::new(fs.clone(), CHIP, 10).with_polarity_idents("normal", "inverted");

        pin.set_polarity(Polarity::Inverted).unwrap();
        assert_eq!(
            fs.contents(&format!("{CHIP}/pwm10/polarity")).as_deref(),
            Some("inverted")
        );
        assert_eq!(pin.polarity().unwrap(), Polarity::Inverted);
    }

    #[test]
    fn test_attr_failure_carries_path() {
        let (pin, fs) = test_pin();
        fs.inject_read_error(&format!("{CHIP}/pwm10/period"), libc::EBUSY);

        let err = pin.period().unwrap_err();
        let text = err.to_string();
        assert!(
            text.contains("/sys/class/pwm/pwmchip0/pwm10/period"),
            "unexpected message: {text}"
        );
    }

    #[test]
    fn test_garbage_polarity_is_invalid_data() {
        let (pin, fs) = test_pin();
        fs.set_contents(&format!("{CHIP}/pwm10/polarity"), "sideways");

        let err = pin.polarity().unwrap_err();
        assert!(matches!(err, PwmError::PinIo { .. }));
    }
}
