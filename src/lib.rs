//! Headless frame-grabber capture.
//!
//! The acquisition driver lives in the `daq-driver-grabber` crate (re-exported
//! as [`driver`]). This crate adds what a standalone capture process needs:
//! - [`config`] - Figment-based configuration (TOML file + environment)
//! - [`tracing_setup`] - Subscriber initialisation (pretty / compact / JSON)
//! - [`capture`] - Opening, running and tearing down the configured channels

pub mod capture;
pub mod config;
pub mod tracing_setup;

pub use daq_driver_grabber as driver;
