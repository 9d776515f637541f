//! Crate-wide error type and multi-resource teardown aggregation.

use std::fmt;
use std::io;

use thiserror::Error;

pub use crate::gpio::GpioError;
pub use crate::i2c::I2cError;
pub use crate::pwm::PwmError;

/// Common result type for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error wrapping the per-bus error types.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    I2c(#[from] I2cError),

    #[error(transparent)]
    Pwm(#[from] PwmError),

    #[error(transparent)]
    Gpio(#[from] GpioError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Closed set of OS error categories this layer branches on.
///
/// The raw errno is mapped exactly once, here; call sites match on the
/// category instead of re-deriving it from error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsCategory {
    Busy,
    AlreadyExists,
    NotFound,
    BadAddress,
    Other,
}

impl OsCategory {
    pub fn of(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EBUSY) => Self::Busy,
            Some(libc::EEXIST) => Self::AlreadyExists,
            Some(libc::ENOENT) => Self::NotFound,
            Some(libc::EFAULT) => Self::BadAddress,
            _ => Self::Other,
        }
    }

    /// Whether an export/unexport write failed only because the line is
    /// already in the requested ownership state.
    pub fn is_already_owned(self) -> bool {
        matches!(self, Self::Busy | Self::AlreadyExists)
    }
}

/// Composite error from a multi-resource teardown.
///
/// Releasing an adaptor may tear down many independently-owned pins and
/// connections. Every release is attempted even when earlier ones fail;
/// the failures accumulate here instead of short-circuiting, so partial
/// teardown is never silently swallowed.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl Into<Error>) {
        self.errors.push(err.into());
    }

    /// Record the outcome of one release attempt, keeping only failures.
    pub fn record<T, E: Into<Error>>(&mut self, result: std::result::Result<T, E>) {
        if let Err(err) = result {
            self.errors.push(err.into());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// `Ok(())` if nothing failed, otherwise the collected failures.
    pub fn into_result(self) -> std::result::Result<(), AggregateError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} release(s) failed during teardown", self.errors.len())?;
        for err in &self.errors {
            write!(f, "; {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
