//! Shared test utilities for grabber channel tests.
//!
//! - `init_tracing`: route driver logs to the test output (`RUST_LOG` filter)
//! - `fast_config`: channel config with a short wait timeout
//! - `open_channel`: mock + session + opened channel in one step
//! - `wait_until` / `drain_events`: polling and event collection helpers

#![allow(dead_code)] // Utilities may not all be used in every test file

use std::sync::Arc;
use std::time::{Duration, Instant};

use daq_driver_grabber::{Channel, ChannelConfig, ChannelEvent, DriverSession, MockGrabber};
use tokio::sync::broadcast;

/// Wait timeout used by test channels.
pub const TEST_WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// Install a test subscriber once. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Source 0 on VID1/NTSC with a short wait timeout.
pub fn fast_config() -> ChannelConfig {
    ChannelConfig::new(0, "VID1", "NTSC").with_wait_timeout(TEST_WAIT_TIMEOUT)
}

/// Open a channel on a fresh mock and private session.
pub fn open_channel() -> (Arc<MockGrabber>, Arc<DriverSession>, Channel) {
    init_tracing();
    let mock = MockGrabber::new();
    let session = DriverSession::new(mock.clone());
    let channel = Channel::open(&session, fast_config()).expect("open channel");
    (mock, session, channel)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Collect every event currently queued on `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
