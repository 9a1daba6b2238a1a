//! Error types and native status translation.
//!
//! Every native call returns a status code. [`ErrorReporter`] turns non-zero
//! codes into [`GrabberError`] values, looking up the vendor's description
//! text through the string-parameter interface. The lookup is best effort: if
//! it fails for any reason the description is [`UNKNOWN_ERROR`].

use std::time::Duration;

use thiserror::Error;

use crate::api::{GrabberApi, Handle, Param, Status, STATUS_OK};
use crate::channel::ChannelState;

/// Result type alias for grabber operations.
pub type Result<T> = std::result::Result<T, GrabberError>;

/// Description used when the vendor text cannot be fetched.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Size of the buffer handed to the native description lookup.
pub const ERROR_DESC_LEN: usize = grabber_sys::FG_ERROR_DESC_LEN as usize;

/// Errors produced by the grabber driver.
#[derive(Error, Debug)]
pub enum GrabberError {
    /// A setup-time native call failed; construction is aborted.
    #[error("Configuration failed during {operation} (code {code}): {message}")]
    Configuration {
        operation: String,
        code: Status,
        message: String,
    },

    /// Opening or closing the shared driver session failed.
    #[error("Driver session {operation} failed (code {code}): {message}")]
    DriverSession {
        operation: &'static str,
        code: Status,
        message: String,
    },

    /// The blocking wait call itself failed.
    #[error("Signal wait failed (code {code}): {message}")]
    SignalWait { code: Status, message: String },

    /// A filled buffer could not be handed back to the native pool.
    #[error("Failed to free buffer {buffer} (code {code}): {message}")]
    BufferRelease {
        buffer: Handle,
        code: Status,
        message: String,
    },

    /// Frame geometry or buffer address could not be resolved.
    #[error("Failed to resolve frame for buffer {buffer} (code {code}): {message}")]
    FrameGeometry {
        buffer: Handle,
        code: Status,
        message: String,
    },

    /// Operation not allowed in the current lifecycle state.
    #[error("Invalid channel state: expected {expected}, found {actual:?}")]
    InvalidState {
        expected: &'static str,
        actual: ChannelState,
    },

    /// The channel has been disposed.
    #[error("Channel has been disposed")]
    Disposed,

    /// Operation would deadlock or invalidate the running capture thread.
    #[error("{operation} cannot be called from the capture thread")]
    CaptureThreadReentry { operation: &'static str },

    /// The capture thread did not exit within the stop bound.
    #[error("Capture thread did not exit within {0:?}")]
    StopTimeout(Duration),

    /// Invalid channel configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The capture thread could not be spawned.
    #[error("Failed to spawn capture thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

impl GrabberError {
    /// Whether this error ends the acquisition loop.
    pub fn is_fatal_to_loop(&self) -> bool {
        matches!(
            self,
            Self::SignalWait { .. } | Self::BufferRelease { .. } | Self::FrameGeometry { .. }
        )
    }

    /// Raw native status code, when the error came from a native call.
    pub fn code(&self) -> Option<Status> {
        match self {
            Self::Configuration { code, .. }
            | Self::DriverSession { code, .. }
            | Self::SignalWait { code, .. }
            | Self::BufferRelease { code, .. }
            | Self::FrameGeometry { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Translates native status codes into [`GrabberError`] values.
pub struct ErrorReporter<'a> {
    api: &'a dyn GrabberApi,
}

impl<'a> ErrorReporter<'a> {
    /// Create a reporter that looks descriptions up through `api`.
    pub fn new(api: &'a dyn GrabberApi) -> Self {
        Self { api }
    }

    /// Human-readable description of a status code.
    ///
    /// The lookup key is the error-description parameter offset by the
    /// absolute value of the code, read from the configuration pseudo handle.
    pub fn describe(&self, code: Status) -> String {
        let key = grabber_sys::PARAM_ERROR_DESC.wrapping_add(code.unsigned_abs());
        let mut buf = [0u8; ERROR_DESC_LEN];

        let status = self.api.get_str(Handle::CONFIGURATION, Param::Id(key), &mut buf);
        if status != STATUS_OK {
            return UNKNOWN_ERROR.to_string();
        }

        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let text = String::from_utf8_lossy(&buf[..end]).trim().to_string();
        if text.is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            text
        }
    }

    /// Check a setup-time status.
    pub fn configuration(&self, status: Status, operation: impl Into<String>) -> Result<()> {
        if status == STATUS_OK {
            return Ok(());
        }
        Err(GrabberError::Configuration {
            operation: operation.into(),
            code: status,
            message: self.describe(status),
        })
    }

    /// Check a driver session open/close status.
    pub fn session(&self, status: Status, operation: &'static str) -> Result<()> {
        if status == STATUS_OK {
            return Ok(());
        }
        Err(GrabberError::DriverSession {
            operation,
            code: status,
            message: self.describe(status),
        })
    }

    /// Error for a failed wait call.
    pub fn signal_wait(&self, status: Status) -> GrabberError {
        GrabberError::SignalWait {
            code: status,
            message: self.describe(status),
        }
    }

    /// Check the status of a Filled -> Free buffer transition.
    pub fn buffer_release(&self, status: Status, buffer: Handle) -> Result<()> {
        if status == STATUS_OK {
            return Ok(());
        }
        Err(GrabberError::BufferRelease {
            buffer,
            code: status,
            message: self.describe(status),
        })
    }

    /// Check the status of a frame geometry or address query.
    pub fn frame_geometry(&self, status: Status, buffer: Handle) -> Result<()> {
        if status == STATUS_OK {
            return Ok(());
        }
        Err(GrabberError::FrameGeometry {
            buffer,
            code: status,
            message: self.describe(status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GrabberError::Configuration {
            operation: "set Connector".to_string(),
            code: -2,
            message: "Bad parameter".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("set Connector"));
        assert!(text.contains("-2"));
        assert!(text.contains("Bad parameter"));
    }

    #[test]
    fn test_fatal_classification() {
        let wait = GrabberError::SignalWait {
            code: -3,
            message: UNKNOWN_ERROR.to_string(),
        };
        assert!(wait.is_fatal_to_loop());
        assert_eq!(wait.code(), Some(-3));
        assert!(!GrabberError::Disposed.is_fatal_to_loop());
        assert_eq!(GrabberError::Disposed.code(), None);
    }
}
