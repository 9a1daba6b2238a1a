//! Native status translation and description lookup.

#![cfg(feature = "mock")]

use daq_driver_grabber::error::{ErrorReporter, UNKNOWN_ERROR};
use daq_driver_grabber::{GrabberError, Handle, MockGrabber};

#[test]
fn test_description_is_looked_up() {
    let mock = MockGrabber::new();
    mock.set_error_description(grabber_sys::FG_TIMEOUT, "  Timeout expired \n");
    let reporter = ErrorReporter::new(mock.as_ref());

    assert_eq!(reporter.describe(grabber_sys::FG_TIMEOUT), "Timeout expired");
}

#[test]
fn test_failed_lookup_falls_back() {
    let mock = MockGrabber::new();
    let reporter = ErrorReporter::new(mock.as_ref());

    assert_eq!(reporter.describe(grabber_sys::FG_INTERNAL_ERROR), UNKNOWN_ERROR);
    assert_eq!(reporter.describe(-9999), UNKNOWN_ERROR);
}

#[test]
fn test_empty_description_falls_back() {
    let mock = MockGrabber::new();
    mock.set_error_description(grabber_sys::FG_IN_USE, "");
    let reporter = ErrorReporter::new(mock.as_ref());

    assert_eq!(reporter.describe(grabber_sys::FG_IN_USE), UNKNOWN_ERROR);
}

#[test]
fn test_long_description_is_bounded() {
    let mock = MockGrabber::new();
    mock.set_error_description(grabber_sys::FG_DATABASE_ERROR, "x".repeat(1000));
    let reporter = ErrorReporter::new(mock.as_ref());

    let text = reporter.describe(grabber_sys::FG_DATABASE_ERROR);
    assert_eq!(text.len(), grabber_sys::FG_ERROR_DESC_LEN as usize - 1);
}

#[test]
fn test_positive_and_negative_codes_share_a_key() {
    let mock = MockGrabber::new();
    mock.set_error_description(-5, "Out of resources");
    let reporter = ErrorReporter::new(mock.as_ref());

    assert_eq!(reporter.describe(5), "Out of resources");
}

#[test]
fn test_success_is_not_an_error() {
    let mock = MockGrabber::new();
    let reporter = ErrorReporter::new(mock.as_ref());

    assert!(reporter.configuration(0, "set Standard").is_ok());
    assert!(reporter.session(0, "open").is_ok());
    assert!(reporter.buffer_release(0, Handle(1)).is_ok());
}

#[test]
fn test_errors_carry_operation_code_and_text() {
    let mock = MockGrabber::new();
    mock.set_error_description(grabber_sys::FG_IO_ERROR, "I/O error");
    let reporter = ErrorReporter::new(mock.as_ref());

    let err = reporter
        .buffer_release(grabber_sys::FG_IO_ERROR, Handle(0x5000_0001))
        .unwrap_err();
    assert!(err.is_fatal_to_loop());
    assert_eq!(
        err.to_string(),
        "Failed to free buffer 0x50000001 (code -3): I/O error"
    );

    let err = reporter.signal_wait(grabber_sys::FG_INVALID_HANDLE);
    assert!(matches!(
        &err,
        GrabberError::SignalWait { code, message } if *code == -11 && message == UNKNOWN_ERROR
    ));
}
