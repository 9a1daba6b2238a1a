//! Build script for grabber-sys FFI bindings.
//!
//! Two modes:
//!
//! 1. With `grabber-sdk` feature: generates bindings from the vendor `fgapi.h`
//!    header and links the vendor library.
//! 2. Without feature: writes pre-defined bindings with panicking stubs so the
//!    workspace builds and tests on machines without the SDK.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=wrapper.h");
    println!("cargo:rerun-if-env-changed=GRABBER_SDK_DIR");
    println!("cargo:rerun-if-env-changed=GRABBER_LIB_DIR");

    #[cfg(feature = "grabber-sdk")]
    generate_bindings();

    #[cfg(not(feature = "grabber-sdk"))]
    generate_dummy_bindings();
}

#[cfg(feature = "grabber-sdk")]
fn generate_bindings() {
    let sdk_dir = env::var("GRABBER_SDK_DIR").expect(
        "GRABBER_SDK_DIR environment variable must be set when `grabber-sdk` feature is enabled.",
    );

    let include_path = PathBuf::from(&sdk_dir).join("include");
    let lib_path = env::var("GRABBER_LIB_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(&sdk_dir).join("lib"));

    if !include_path.exists() {
        panic!("Grabber SDK include path does not exist: {:?}", include_path);
    }
    if !lib_path.exists() {
        eprintln!("Warning: Grabber SDK lib path does not exist: {:?}", lib_path);
    }

    let bindings = bindgen::Builder::default()
        .header("wrapper.h")
        .clang_arg(format!("-I{}", include_path.display()))
        .allowlist_function("fg_.*")
        .allowlist_type("FG.*")
        .allowlist_var("FG_.*")
        .allowlist_var("PARAM_.*")
        // Keep constants at top level (matches dummy bindings)
        .default_enum_style(bindgen::EnumVariation::Consts)
        .derive_debug(true)
        .derive_copy(true)
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .generate()
        .expect("Unable to generate grabber bindings");

    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    bindings
        .write_to_file(out_path.join("bindings.rs"))
        .expect("Couldn't write bindings!");

    println!("cargo:rustc-link-search=native={}", lib_path.display());

    #[cfg(target_os = "windows")]
    {
        println!("cargo:rustc-link-lib=fgapi64");
    }
    #[cfg(not(target_os = "windows"))]
    {
        println!("cargo:rustc-link-lib=fgapi");
    }
}

/// Generate dummy bindings when the SDK is not available.
#[cfg(not(feature = "grabber-sdk"))]
fn generate_dummy_bindings() {
    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    let dummy = r#"
// Dummy bindings - grabber-sdk feature not enabled
//
// Constants and types mirror fgapi.h. The functions are stubs that panic when
// called; enable the `grabber-sdk` feature to link the vendor library.

use std::os::raw::{c_char, c_int, c_uint, c_void};

/// Opaque handle to a driver object (configuration, board, channel, surface)
pub type FGHANDLE = c_uint;

/// Status code returned by every API call (0 = success)
pub type FGSTATUS = c_int;

/// Signal record filled by `fg_wait_signal`
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct FG_SIGNALINFO {
    pub Context: *mut c_void,
    pub Instance: FGHANDLE,
    pub Signal: c_int,
    pub SignalInfo: c_uint,
    pub SignalContext: c_uint,
}

// Status codes
pub const FG_OK: FGSTATUS = 0;
pub const FG_NO_BOARD_FOUND: FGSTATUS = -1;
pub const FG_BAD_PARAMETER: FGSTATUS = -2;
pub const FG_IO_ERROR: FGSTATUS = -3;
pub const FG_INTERNAL_ERROR: FGSTATUS = -4;
pub const FG_NO_MORE_RESOURCES: FGSTATUS = -5;
pub const FG_IN_USE: FGSTATUS = -6;
pub const FG_NOT_SUPPORTED: FGSTATUS = -7;
pub const FG_DATABASE_ERROR: FGSTATUS = -8;
pub const FG_OUT_OF_BOUND: FGSTATUS = -9;
pub const FG_TIMEOUT: FGSTATUS = -10;
pub const FG_INVALID_HANDLE: FGSTATUS = -11;
pub const FG_INVALID_STATE: FGSTATUS = -12;

// Pseudo handles
pub const FG_CONFIGURATION: FGHANDLE = 0x2000_0000;
pub const FG_BOARD: FGHANDLE = 0xE000_0000;

// Parameter identifiers
pub const PARAM_DRIVER_INDEX: c_uint = 1;
pub const PARAM_CONNECTOR: c_uint = 2;
pub const PARAM_STANDARD: c_uint = 3;
pub const PARAM_COLOR_FORMAT: c_uint = 4;
pub const PARAM_ACQUISITION_MODE: c_uint = 5;
pub const PARAM_TRIG_MODE: c_uint = 6;
pub const PARAM_NEXT_TRIG_MODE: c_uint = 7;
pub const PARAM_SEQ_LENGTH_FR: c_uint = 8;
pub const PARAM_CHANNEL_STATE: c_uint = 9;
pub const PARAM_SURFACE_STATE: c_uint = 10;
pub const PARAM_SURFACE_ADDR: c_uint = 11;
pub const PARAM_IMAGE_SIZE_X: c_uint = 12;
pub const PARAM_IMAGE_SIZE_Y: c_uint = 13;
pub const PARAM_BUFFER_PITCH: c_uint = 14;
pub const PARAM_SIGNAL_ENABLE: c_uint = 0x0100;
pub const PARAM_SIGNAL_HANDLING: c_uint = 0x0200;
pub const PARAM_ERROR_DESC: c_uint = 0x1000;

// Enumerated parameter values
pub const FG_COLOR_FORMAT_Y8: c_int = 1;
pub const FG_COLOR_FORMAT_RGB24: c_int = 3;
pub const FG_ACQUISITION_MODE_VIDEO: c_int = 1;
pub const FG_TRIG_MODE_IMMEDIATE: c_int = 1;
pub const FG_NEXT_TRIG_MODE_REPEAT: c_int = 2;
pub const FG_INDETERMINATE: c_int = -1;
pub const FG_CHANNEL_STATE_IDLE: c_int = 1;
pub const FG_CHANNEL_STATE_READY: c_int = 2;
pub const FG_CHANNEL_STATE_ACTIVE: c_int = 3;
pub const FG_SURFACE_STATE_FREE: c_int = 1;
pub const FG_SURFACE_STATE_FILLED: c_int = 2;
pub const FG_SIGNAL_ENABLE_OFF: c_int = 0;
pub const FG_SIGNAL_ENABLE_ON: c_int = 1;
pub const FG_SIGNAL_HANDLING_WAITING: c_int = 1;
pub const FG_SIGNAL_HANDLING_CALLBACK: c_int = 2;

// Signals
pub const FG_SIG_ANY: c_int = 0;
pub const FG_SIG_SURFACE_FILLED: c_int = 1;
pub const FG_SIG_ACQUISITION_FAILURE: c_int = 2;
pub const FG_SIG_END_CHANNEL_ACTIVITY: c_int = 3;

// Error description buffer size required by fg_get_param_str
pub const FG_ERROR_DESC_LEN: c_uint = 256;

const GRABBER_SDK_PANIC_MSG: &str = "grabber function called but grabber-sdk feature is not enabled. \
    Enable the grabber-sdk feature (or grabber_sdk in daq-driver-grabber) to use the vendor library.";

#[no_mangle]
pub unsafe extern "C" fn fg_open_driver(_instance_name: *const c_char) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_close_driver() -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_create_nm(_model_name: *const c_char, _instance: *mut FGHANDLE) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_delete(_instance: FGHANDLE) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_set_param_int(_instance: FGHANDLE, _param: c_uint, _value: c_int) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_set_param_nm_int(_instance: FGHANDLE, _name: *const c_char, _value: c_int) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_set_param_str(_instance: FGHANDLE, _param: c_uint, _value: *const c_char) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_set_param_nm_str(_instance: FGHANDLE, _name: *const c_char, _value: *const c_char) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_get_param_int(_instance: FGHANDLE, _param: c_uint, _value: *mut c_int) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_get_param_nm_int(_instance: FGHANDLE, _name: *const c_char, _value: *mut c_int) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_get_param_ptr(_instance: FGHANDLE, _param: c_uint, _value: *mut *mut c_void) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_get_param_nm_ptr(_instance: FGHANDLE, _name: *const c_char, _value: *mut *mut c_void) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_get_param_str(
    _instance: FGHANDLE,
    _param: c_uint,
    _value: *mut c_char,
    _max_length: c_uint,
) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_get_param_nm_str(
    _instance: FGHANDLE,
    _name: *const c_char,
    _value: *mut c_char,
    _max_length: c_uint,
) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}

#[no_mangle]
pub unsafe extern "C" fn fg_wait_signal(
    _instance: FGHANDLE,
    _signal: c_int,
    _timeout_ms: c_uint,
    _info: *mut FG_SIGNALINFO,
) -> FGSTATUS {
    panic!("{}", GRABBER_SDK_PANIC_MSG);
}
"#;

    std::fs::write(out_path.join("bindings.rs"), dummy).expect("Couldn't write dummy bindings!");
}
