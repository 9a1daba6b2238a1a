//! Vendor library binding.
//!
//! [`SdkGrabber`] forwards every [`GrabberApi`] call to `grabber-sys`. Name
//! arguments are converted to C strings; a name containing an interior NUL
//! cannot be passed and yields `FG_BAD_PARAMETER` without calling the library.

#![allow(unsafe_code)]

use std::ffi::{c_char, c_uint, c_void, CString};
use std::sync::Arc;

use tracing::debug;

use crate::api::{GrabberApi, Handle, Param, RawSignalInfo, Status};

/// [`GrabberApi`] backed by the vendor frame-grabber library.
#[derive(Debug, Default)]
pub struct SdkGrabber {
    driver_name: Option<CString>,
}

impl SdkGrabber {
    /// Binding that opens the library's default driver instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Binding that opens a named driver instance.
    pub fn with_driver_name(name: &str) -> Option<Arc<Self>> {
        let driver_name = CString::new(name).ok()?;
        Some(Arc::new(Self {
            driver_name: Some(driver_name),
        }))
    }
}

fn c_string(value: &str) -> Result<CString, Status> {
    CString::new(value).map_err(|_| grabber_sys::FG_BAD_PARAMETER)
}

/// Run `by_id` or `by_name` depending on how the parameter is addressed.
fn with_param<F, G>(param: Param<'_>, by_id: F, by_name: G) -> Status
where
    F: FnOnce(c_uint) -> Status,
    G: FnOnce(*const c_char) -> Status,
{
    match param {
        Param::Id(id) => by_id(id),
        Param::Name(name) => match c_string(name) {
            Ok(name) => by_name(name.as_ptr()),
            Err(status) => status,
        },
    }
}

impl GrabberApi for SdkGrabber {
    fn open_driver(&self) -> Status {
        let name = self
            .driver_name
            .as_ref()
            .map_or(std::ptr::null(), |n| n.as_ptr());
        debug!(driver = ?self.driver_name, "fg_open_driver");
        // SAFETY: `name` is null or a valid NUL-terminated string owned by self.
        unsafe { grabber_sys::fg_open_driver(name) }
    }

    fn close_driver(&self) -> Status {
        // SAFETY: no arguments; the session guarantees pairing with open.
        unsafe { grabber_sys::fg_close_driver() }
    }

    fn create_channel(&self, model: &str, instance: &mut Handle) -> Status {
        let model = match c_string(model) {
            Ok(model) => model,
            Err(status) => return status,
        };
        let mut raw = 0;
        // SAFETY: `model` outlives the call and `raw` is a valid out-pointer.
        let status = unsafe { grabber_sys::fg_create_nm(model.as_ptr(), &mut raw) };
        *instance = Handle(raw);
        status
    }

    fn delete(&self, instance: Handle) -> Status {
        // SAFETY: plain handle argument.
        unsafe { grabber_sys::fg_delete(instance.raw()) }
    }

    fn set_int(&self, target: Handle, param: Param<'_>, value: i32) -> Status {
        let h = target.raw();
        // SAFETY: scalar arguments and C strings that outlive the call.
        with_param(
            param,
            |id| unsafe { grabber_sys::fg_set_param_int(h, id, value) },
            |name| unsafe { grabber_sys::fg_set_param_nm_int(h, name, value) },
        )
    }

    fn set_str(&self, target: Handle, param: Param<'_>, value: &str) -> Status {
        let value = match c_string(value) {
            Ok(value) => value,
            Err(status) => return status,
        };
        let h = target.raw();
        let v = value.as_ptr();
        // SAFETY: `value` and the name string outlive the call.
        with_param(
            param,
            |id| unsafe { grabber_sys::fg_set_param_str(h, id, v) },
            |name| unsafe { grabber_sys::fg_set_param_nm_str(h, name, v) },
        )
    }

    fn get_int(&self, target: Handle, param: Param<'_>, value: &mut i32) -> Status {
        let h = target.raw();
        let out: *mut i32 = value;
        // SAFETY: `out` points to a live i32 for the duration of the call.
        with_param(
            param,
            |id| unsafe { grabber_sys::fg_get_param_int(h, id, out) },
            |name| unsafe { grabber_sys::fg_get_param_nm_int(h, name, out) },
        )
    }

    fn get_ptr(&self, target: Handle, param: Param<'_>, value: &mut *mut c_void) -> Status {
        let h = target.raw();
        let out: *mut *mut c_void = value;
        // SAFETY: `out` points to a live pointer slot for the duration of the call.
        with_param(
            param,
            |id| unsafe { grabber_sys::fg_get_param_ptr(h, id, out) },
            |name| unsafe { grabber_sys::fg_get_param_nm_ptr(h, name, out) },
        )
    }

    fn get_str(&self, target: Handle, param: Param<'_>, buf: &mut [u8]) -> Status {
        let Ok(max_len) = c_uint::try_from(buf.len()) else {
            return grabber_sys::FG_OUT_OF_BOUND;
        };
        let h = target.raw();
        let out = buf.as_mut_ptr().cast::<c_char>();
        // SAFETY: the library writes at most `max_len` bytes into `buf`.
        with_param(
            param,
            |id| unsafe { grabber_sys::fg_get_param_str(h, id, out, max_len) },
            |name| unsafe { grabber_sys::fg_get_param_nm_str(h, name, out, max_len) },
        )
    }

    fn wait_signal(&self, instance: Handle, timeout_ms: u32, info: &mut RawSignalInfo) -> Status {
        // SAFETY: `info` is a valid, exclusively borrowed record of the
        // library's layout.
        unsafe {
            grabber_sys::fg_wait_signal(instance.raw(), grabber_sys::FG_SIG_ANY, timeout_ms, info)
        }
    }
}
