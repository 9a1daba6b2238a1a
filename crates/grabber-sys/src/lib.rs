//! Low-level FFI bindings for the frame-grabber vendor C API (`fgapi`).
//!
//! The vendor API is a flat, handle-based interface: a process-wide driver
//! session, channel objects created by model name, integer/string/pointer
//! parameters addressed by numeric id or by name, and a blocking
//! `fg_wait_signal` that fills a fixed-layout [`FG_SIGNALINFO`] record.
//!
//! # Safety
//!
//! All functions in this crate are `unsafe` as they are direct FFI bindings.
//! For a safe wrapper, use the `daq-driver-grabber` crate instead.
//!
//! # Features
//!
//! - `grabber-sdk`: Generate bindings from the vendor headers and link the
//!   vendor library. Without this feature, pre-defined bindings with panicking
//!   function stubs are used so dependent crates build and test anywhere.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(dead_code)]
#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_constants_distinct() {
        let signals = [
            FG_SIG_SURFACE_FILLED,
            FG_SIG_ACQUISITION_FAILURE,
            FG_SIG_END_CHANNEL_ACTIVITY,
        ];
        for (i, a) in signals.iter().enumerate() {
            assert_ne!(*a, FG_SIG_ANY);
            for b in &signals[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_signal_info_layout() {
        // Context pointer first, followed by four 32-bit fields
        let ptr = std::mem::size_of::<*mut std::os::raw::c_void>();
        assert!(std::mem::size_of::<FG_SIGNALINFO>() >= ptr + 16);
        assert_eq!(FG_OK, 0);
        assert!(FG_TIMEOUT < 0);
    }
}
