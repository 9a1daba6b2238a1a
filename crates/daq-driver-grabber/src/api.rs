//! Native API seam.
//!
//! Every interaction with the vendor library goes through [`GrabberApi`]. The
//! trait mirrors the C surface closely: each call returns a raw status code
//! (`0` = success) and writes results through out-parameters, so the error
//! translation in [`crate::error::ErrorReporter`] sees exactly what the vendor
//! library reported.
//!
//! Implementations:
//! - [`crate::sdk::SdkGrabber`] - the vendor library via `grabber-sys`
//!   (feature `grabber_sdk`)
//! - [`crate::mock::MockGrabber`] - scripted in-process fake (feature `mock`)

use std::ffi::c_void;
use std::fmt;

/// Raw status code returned by native calls.
pub type Status = i32;

/// Success status.
pub const STATUS_OK: Status = grabber_sys::FG_OK;

/// Status returned by [`GrabberApi::wait_signal`] when no signal arrived in time.
pub const STATUS_TIMEOUT: Status = grabber_sys::FG_TIMEOUT;

/// Fixed-layout signal record filled by [`GrabberApi::wait_signal`].
///
/// Only [`crate::components::signal::SignalEvent::decode`] looks inside it.
pub type RawSignalInfo = grabber_sys::FG_SIGNALINFO;

/// Opaque native object handle (driver configuration, channel, or surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(pub u32);

impl Handle {
    /// Pseudo handle addressing driver-wide parameters (error descriptions).
    pub const CONFIGURATION: Handle = Handle(grabber_sys::FG_CONFIGURATION);

    /// Raw handle value as passed to the native library.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Parameter address: numeric identifier or parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param<'a> {
    /// Numeric parameter identifier
    Id(u32),
    /// Parameter name
    Name(&'a str),
}

impl Param<'_> {
    /// Address an indexed parameter family (e.g. per-signal settings).
    pub fn indexed(base: u32, index: i32) -> Param<'static> {
        Param::Id(base.wrapping_add(index.unsigned_abs()))
    }
}

impl fmt::Display for Param<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Id(id) => write!(f, "#{:#06x}", id),
            Param::Name(name) => write!(f, "{}", name),
        }
    }
}

/// A zeroed signal record ready to be filled by [`GrabberApi::wait_signal`].
pub fn empty_signal_info() -> RawSignalInfo {
    RawSignalInfo {
        Context: std::ptr::null_mut(),
        Instance: 0,
        Signal: 0,
        SignalInfo: 0,
        SignalContext: 0,
    }
}

/// The native frame-grabber API.
///
/// Implementations must be callable from any thread. The driver guarantees
/// that a given channel handle is only used from one thread at a time.
pub trait GrabberApi: Send + Sync {
    /// Open the process-wide driver session.
    fn open_driver(&self) -> Status;

    /// Close the process-wide driver session.
    fn close_driver(&self) -> Status;

    /// Create a channel object of the given model, writing its handle to `instance`.
    fn create_channel(&self, model: &str, instance: &mut Handle) -> Status;

    /// Delete a previously created object.
    fn delete(&self, instance: Handle) -> Status;

    /// Set an integer (or enumerated) parameter.
    fn set_int(&self, target: Handle, param: Param<'_>, value: i32) -> Status;

    /// Set a string parameter.
    fn set_str(&self, target: Handle, param: Param<'_>, value: &str) -> Status;

    /// Read an integer parameter.
    fn get_int(&self, target: Handle, param: Param<'_>, value: &mut i32) -> Status;

    /// Read a pointer parameter.
    fn get_ptr(&self, target: Handle, param: Param<'_>, value: &mut *mut c_void) -> Status;

    /// Read a string parameter into `buf` as a NUL-terminated byte string.
    fn get_str(&self, target: Handle, param: Param<'_>, buf: &mut [u8]) -> Status;

    /// Block until any enabled signal fires on `instance`, or `timeout_ms` elapses.
    ///
    /// Returns [`STATUS_TIMEOUT`] when nothing arrived.
    fn wait_signal(&self, instance: Handle, timeout_ms: u32, info: &mut RawSignalInfo) -> Status;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_param() {
        assert_eq!(Param::indexed(0x100, 3), Param::Id(0x103));
        assert_eq!(Param::indexed(0x1000, -12), Param::Id(0x100C));
    }

    #[test]
    fn test_display() {
        assert_eq!(Handle(0x2A).to_string(), "0x0000002A");
        assert_eq!(Param::Name("Connector").to_string(), "Connector");
        assert_eq!(Param::Id(9).to_string(), "#0x0009");
    }
}
