//! Frame-grabber channel acquisition driver.
//!
//! This crate drives video capture channels of a frame-grabber board through
//! the vendor's C library (`grabber-sys`). Each [`Channel`] binds one video
//! source, receives frames on a dedicated capture thread by blocking on the
//! driver's signal wait, and hands every frame synchronously to registered
//! observers before returning the buffer to the driver's pool.
//!
//! # Architecture
//!
//! ## Session
//! - [`DriverSession`] - Reference-counted open/close of the process-wide driver
//! - [`SessionGuard`] - RAII reference held by each channel
//!
//! ## Channel
//! - [`Channel`] - Lifecycle: open (configure + pre-arm), start, stop, dispose
//! - [`ChannelConfig`] - Source index, connector, video standard, timeouts
//! - [`ChannelEvent`] - Loop notifications on a broadcast channel
//!
//! ## Frames
//! - [`FrameObserver`] - Per-frame hook, called on the capture thread
//! - [`FrameDescriptor`] - Borrowed view of one frame (address, geometry)
//!
//! ## Native layer
//! - [`GrabberApi`] - Status-code returning seam over the vendor library
//! - [`SdkGrabber`] - Vendor library binding (feature `grabber_sdk`)
//! - [`MockGrabber`] - Scripted fake for tests and demos (feature `mock`)
//! - [`ErrorReporter`] - Status code to [`GrabberError`] with vendor description
//!
//! # Example
//!
//! ```no_run
//! use daq_driver_grabber::{Channel, ChannelConfig, DriverSession, FrameDescriptor, MockGrabber};
//!
//! # fn example() -> anyhow::Result<()> {
//! let session = DriverSession::new(MockGrabber::new());
//! let channel = Channel::open(&session, ChannelConfig::new(0, "VID1", "NTSC"))?;
//!
//! channel.add_observer(|frame: &FrameDescriptor<'_>| {
//!     println!("frame {}x{} at {:p}", frame.width(), frame.height(), frame.address());
//! })?;
//!
//! channel.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! channel.stop()?;
//! channel.dispose()?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod components;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
#[cfg(feature = "grabber_sdk")]
pub mod sdk;

pub use api::{GrabberApi, Handle, Param, RawSignalInfo, Status};
pub use channel::{Channel, ChannelConfig, ChannelState};
pub use components::acquisition::{ChannelEvent, ChannelStats};
pub use components::dispatch::{FrameDescriptor, FrameObserver};
pub use components::session::{DriverSession, SessionGuard};
pub use components::signal::{SignalEvent, SignalKind};
pub use error::{ErrorReporter, GrabberError, Result};
#[cfg(feature = "mock")]
pub use mock::{MockCall, MockGrabber, MockSignal};
#[cfg(feature = "grabber_sdk")]
pub use sdk::SdkGrabber;
