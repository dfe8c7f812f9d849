//! Typed error set for the device protocol stack.
//!
//! Every condition a device-facing call can surface is a variant of
//! [`DeviceError`]. The executor decides retry eligibility by matching the
//! variant (see [`DeviceError::is_transient`]), never by downcasting, so the
//! full classification lives in one place.
//!
//! ## Error Categories
//!
//! - **Transient protocol errors** - [`DeviceError::UnexpectedReturnCode`].
//!   The device echoed a stale or garbled status byte; the executor retries
//!   these a bounded number of times before surfacing them.
//! - **Device-busy conditions** - `CameraIsOff`, `AutoGuidingActive`,
//!   `AnotherCommandInProgress`, `UiLocked`, `CannotDoFunctions`. The device
//!   answered coherently but refuses the command in its current state.
//!   Retrying would not change anything; these are surfaced immediately.
//! - **Connection errors** - `NotConnected`, `NoDeviceFound`,
//!   `UnsupportedMode`, `Io`. Fatal to the requested operation; the caller
//!   must reconnect.
//! - **Caller programming errors** - `ParameterRange`. A bug in the calling
//!   code, caught at command construction time.
//! - **Cancellation** - `Cancelled`. Not a failure: a first-class
//!   control-flow outcome that callers match on.

use thiserror::Error;

/// Convenience alias for results of device-facing operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Primary error type for device communication.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The transport is not in a connected state.
    ///
    /// Surfaced before any bytes are written. Recovery: reconnect the
    /// session and retry the operation.
    #[error("device not connected")]
    NotConnected,

    /// Device reports its camera is powered off.
    #[error("camera is off")]
    CameraIsOff,

    /// Device refuses the command while auto-guiding is active.
    #[error("auto-guiding is active")]
    AutoGuidingActive,

    /// Device is still executing a previously issued command.
    #[error("another command is already in progress")]
    AnotherCommandInProgress,

    /// Device front-panel UI holds a lock that blocks remote commands.
    #[error("device UI is locked")]
    UiLocked,

    /// Device is in a mode where the requested function class is unavailable.
    #[error("device cannot execute functions in its current state")]
    CannotDoFunctions,

    /// Device answered with a status byte outside the documented set.
    ///
    /// This usually means a stale or garbled byte on the wire rather than a
    /// real device state, which is why it is the only retry-eligible
    /// condition.
    #[error("unexpected return code 0x{0:02X}")]
    UnexpectedReturnCode(u8),

    /// A command parameter was outside its hardware-defined legal range.
    ///
    /// Raised at command construction time, before anything touches the
    /// transport. Values are never silently clamped.
    #[error("parameter '{name}' = {value} outside allowed range {min}..={max}")]
    ParameterRange {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// A response decoded to fewer bytes than the command declared.
    #[error("response truncated: expected {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    /// Enumeration found no device matching the expected hardware family.
    #[error("no matching device found")]
    NoDeviceFound,

    /// The device could not be brought into a supported protocol mode,
    /// even after the power-on sequence.
    #[error("device could not be brought into a supported protocol mode")]
    UnsupportedMode,

    /// The operation was cancelled by the caller's token.
    ///
    /// Not a failure. Long-running operations perform best-effort hardware
    /// cleanup (halt/abort) before returning this.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport-level I/O failure (includes read/write timeouts).
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Whether the executor may retry the failed exchange.
    ///
    /// Only a garbled status byte qualifies; every other condition either
    /// reflects real device state or a fault that retrying cannot fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UnexpectedReturnCode(_))
    }

    /// Whether this is one of the well-defined device-busy conditions.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::CameraIsOff
                | Self::AutoGuidingActive
                | Self::AnotherCommandInProgress
                | Self::UiLocked
                | Self::CannotDoFunctions
        )
    }

    /// Whether this is the cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
