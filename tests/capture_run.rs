//! Capture runner against the mock grabber.

use std::time::Duration;

use grabber_daq::capture::{build_backend, Capture, CaptureOptions, StopReason};
use grabber_daq::config::{BackendConfig, BackendKind};
use grabber_daq::driver::api::Param;
use grabber_daq::driver::{ChannelConfig, DriverSession, Handle, MockGrabber, MockSignal};

fn channel(source: i32) -> ChannelConfig {
    ChannelConfig::new(source, "VID1", "NTSC").with_wait_timeout(Duration::from_millis(50))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_frame_target_stops_all_channels() {
    let mock = MockGrabber::new();
    mock.start_stream(Duration::from_millis(2), 4);
    let session = DriverSession::new(mock.clone());

    let configs = vec![channel(0), channel(1)];
    let options = CaptureOptions {
        frames: Some(10),
        duration: Some(Duration::from_secs(10)),
    };

    let capture = Capture::open(&session, &configs, options).unwrap();
    let summary = capture.run(options).await.unwrap();

    assert_eq!(summary.reason, StopReason::FrameTarget);
    assert!(summary.total_frames >= 10);
    assert_eq!(summary.channels.len(), 2);

    let per_channel: u64 = summary
        .channels
        .iter()
        .map(|c| c.stats.frames_dispatched)
        .sum();
    assert_eq!(per_channel, summary.total_frames);
    for channel in &summary.channels {
        assert_eq!(channel.stats.buffers_released, channel.stats.frames_dispatched);
    }

    assert_eq!(session.ref_count(), 0);
    assert!(!mock.is_driver_open());
    assert_eq!(mock.live_channels(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duration_elapses_without_frames() {
    let mock = MockGrabber::new();
    let session = DriverSession::new(mock.clone());
    let options = CaptureOptions {
        frames: Some(1),
        duration: Some(Duration::from_millis(150)),
    };

    let capture = Capture::open(&session, &[channel(0)], options).unwrap();
    let summary = capture.run(options).await.unwrap();

    assert_eq!(summary.reason, StopReason::Duration);
    assert_eq!(summary.total_frames, 0);
    assert!(summary.channels[0].stats.wait_timeouts > 0);
    assert!(!mock.is_driver_open());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_end_of_activity_ends_run() {
    let mock = MockGrabber::new();
    mock.push_signals([
        MockSignal::FrameReady(Handle(0x5000_0001)),
        MockSignal::FrameReady(Handle(0x5000_0002)),
        MockSignal::EndOfActivity,
    ]);
    let session = DriverSession::new(mock.clone());
    let options = CaptureOptions {
        frames: None,
        duration: Some(Duration::from_secs(10)),
    };

    let capture = Capture::open(&session, &[channel(0)], options).unwrap();
    let summary = capture.run(options).await.unwrap();

    assert_eq!(summary.reason, StopReason::ChannelsEnded);
    assert_eq!(summary.total_frames, 2);
    assert_eq!(
        mock.freed_buffers(),
        vec![Handle(0x5000_0001), Handle(0x5000_0002)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_event_burst_still_ends_run() {
    let mock = MockGrabber::new();
    mock.push_signals(
        std::iter::repeat(MockSignal::AcquisitionFailure)
            .take(200)
            .chain([MockSignal::EndOfActivity]),
    );
    let session = DriverSession::new(mock.clone());
    let options = CaptureOptions {
        frames: None,
        duration: Some(Duration::from_secs(10)),
    };

    let capture = Capture::open(&session, &[channel(0)], options).unwrap();
    let summary = capture.run(options).await.unwrap();

    // More events than the broadcast channel holds; the logger may lag past `Stopped`
    assert_eq!(summary.reason, StopReason::ChannelsEnded);
    assert_eq!(summary.channels[0].stats.acquisition_failures, 200);
    assert!(!mock.is_driver_open());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_failure_tears_down_channels() {
    let mock = MockGrabber::new();
    let session = DriverSession::new(mock.clone());
    let options = CaptureOptions {
        frames: None,
        duration: Some(Duration::from_secs(10)),
    };

    let capture = Capture::open(&session, &[channel(0), channel(1)], options).unwrap();
    mock.fail_param(Param::Id(grabber_sys::PARAM_CHANNEL_STATE), -5);

    let result = capture.run(options).await;

    assert!(result.is_err());
    assert_eq!(mock.live_channels(), 0);
    assert_eq!(session.ref_count(), 0);
    assert!(!mock.is_driver_open());
}

#[test]
fn test_open_failure_disposes_earlier_channels() {
    let mock = MockGrabber::new();
    let session = DriverSession::new(mock.clone());

    // Second entry fails validation inside Channel::open
    let configs = vec![channel(0), ChannelConfig::new(1, "", "PAL")];
    let result = Capture::open(&session, &configs, CaptureOptions::default());

    let message = format!("{:#}", result.err().unwrap());
    assert!(message.contains("channel #1"), "{message}");
    assert_eq!(mock.live_channels(), 0);
    assert_eq!(session.ref_count(), 0);
    assert!(!mock.is_driver_open());
}

#[test]
fn test_open_rejects_empty_channel_list() {
    let mock = MockGrabber::new();
    let session = DriverSession::new(mock);
    assert!(Capture::open(&session, &[], CaptureOptions::default()).is_err());
}

#[test]
fn test_mock_backend_builds() {
    let config = BackendConfig {
        kind: BackendKind::Mock,
        mock_frame_period: Duration::from_millis(5),
        ..Default::default()
    };
    assert!(build_backend(&config).is_ok());
}

#[cfg(not(feature = "grabber_sdk"))]
#[test]
fn test_sdk_backend_requires_feature() {
    let config = BackendConfig {
        kind: BackendKind::Sdk,
        ..Default::default()
    };
    assert!(build_backend(&config).is_err());
}
