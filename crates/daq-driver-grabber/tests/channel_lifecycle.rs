//! Channel lifecycle: configuration, rollback, start/stop/dispose semantics.

#![cfg(feature = "mock")]

mod common;

use std::time::{Duration, Instant};

use daq_driver_grabber::api::Param;
use daq_driver_grabber::channel::{CONNECTOR_PARAM, STANDARD_PARAM};
use daq_driver_grabber::{
    Channel, ChannelConfig, ChannelState, DriverSession, FrameDescriptor, GrabberError, MockCall,
    MockGrabber, SignalKind,
};

use common::{fast_config, init_tracing, open_channel, wait_until};

const READY: i32 = grabber_sys::FG_CHANNEL_STATE_READY;
const ACTIVE: i32 = grabber_sys::FG_CHANNEL_STATE_ACTIVE;
const IDLE: i32 = grabber_sys::FG_CHANNEL_STATE_IDLE;

#[test]
fn test_open_applies_configuration_and_pre_arms() {
    init_tracing();
    let mock = MockGrabber::new();
    let session = DriverSession::new(mock.clone());
    let config = ChannelConfig::new(2, "SVID", "PAL");
    let channel = Channel::open(&session, config).unwrap();
    let h = channel.handle();

    assert_eq!(channel.state(), ChannelState::Ready);
    assert_eq!(mock.channel_int(h, Param::Id(grabber_sys::PARAM_DRIVER_INDEX)), Some(2));
    assert_eq!(mock.channel_str(h, Param::Name(CONNECTOR_PARAM)).as_deref(), Some("SVID"));
    assert_eq!(mock.channel_str(h, Param::Name(STANDARD_PARAM)).as_deref(), Some("PAL"));
    assert_eq!(
        mock.channel_int(h, Param::Id(grabber_sys::PARAM_COLOR_FORMAT)),
        Some(grabber_sys::FG_COLOR_FORMAT_RGB24)
    );
    assert_eq!(
        mock.channel_int(h, Param::Id(grabber_sys::PARAM_ACQUISITION_MODE)),
        Some(grabber_sys::FG_ACQUISITION_MODE_VIDEO)
    );
    assert_eq!(
        mock.channel_int(h, Param::Id(grabber_sys::PARAM_TRIG_MODE)),
        Some(grabber_sys::FG_TRIG_MODE_IMMEDIATE)
    );
    assert_eq!(
        mock.channel_int(h, Param::Id(grabber_sys::PARAM_NEXT_TRIG_MODE)),
        Some(grabber_sys::FG_NEXT_TRIG_MODE_REPEAT)
    );
    assert_eq!(
        mock.channel_int(h, Param::Id(grabber_sys::PARAM_SEQ_LENGTH_FR)),
        Some(grabber_sys::FG_INDETERMINATE)
    );

    // Exactly three signals, all with blocking-wait delivery
    let enabled: Vec<String> = mock
        .journal()
        .into_iter()
        .filter_map(|call| match call {
            MockCall::SetInt { param, value, .. } if value == grabber_sys::FG_SIGNAL_ENABLE_ON => {
                Some(param)
            }
            _ => None,
        })
        .filter(|param| {
            SignalKind::ARMED.iter().any(|s| {
                *param == Param::indexed(grabber_sys::PARAM_SIGNAL_ENABLE, s.to_raw()).to_string()
            })
        })
        .collect();
    assert_eq!(enabled.len(), 3);
    for signal in SignalKind::ARMED {
        assert_eq!(
            mock.channel_int(h, Param::indexed(grabber_sys::PARAM_SIGNAL_HANDLING, signal.to_raw())),
            Some(grabber_sys::FG_SIGNAL_HANDLING_WAITING)
        );
    }

    assert_eq!(mock.channel_states(h), vec![READY]);
}

#[test]
fn test_setup_failure_rolls_back_channel_and_session() {
    init_tracing();
    let mock = MockGrabber::new();
    mock.fail_param(Param::Name(STANDARD_PARAM), grabber_sys::FG_BAD_PARAMETER);
    mock.set_error_description(grabber_sys::FG_BAD_PARAMETER, "Invalid parameter value");
    let session = DriverSession::new(mock.clone());

    let err = Channel::open(&session, fast_config()).unwrap_err();
    match &err {
        GrabberError::Configuration { operation, code, message } => {
            assert!(operation.contains(STANDARD_PARAM), "{operation}");
            assert_eq!(*code, grabber_sys::FG_BAD_PARAMETER);
            assert_eq!(message, "Invalid parameter value");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(mock.live_channels(), 0);
    assert!(mock.journal().iter().any(|c| matches!(c, MockCall::Delete(_))));
    assert_eq!(session.ref_count(), 0);
    assert!(!session.is_open());
    assert_eq!(mock.open_count(), 1);
    assert_eq!(mock.close_count(), 1);
}

#[test]
fn test_create_failure_releases_session() {
    init_tracing();
    let mock = MockGrabber::new();
    mock.fail_create(grabber_sys::FG_NO_MORE_RESOURCES);
    let session = DriverSession::new(mock.clone());

    let err = Channel::open(&session, fast_config()).unwrap_err();
    assert_eq!(err.code(), Some(grabber_sys::FG_NO_MORE_RESOURCES));
    assert_eq!(session.ref_count(), 0);
    assert_eq!(mock.close_count(), 1);
    assert!(!mock.journal().iter().any(|c| matches!(c, MockCall::Delete(_))));
}

#[test]
fn test_session_open_failure_surfaces() {
    init_tracing();
    let mock = MockGrabber::new();
    mock.fail_open_driver(grabber_sys::FG_NO_BOARD_FOUND);
    let session = DriverSession::new(mock.clone());

    let err = Channel::open(&session, fast_config()).unwrap_err();
    assert!(matches!(err, GrabberError::DriverSession { operation: "open", .. }));
    assert_eq!(session.ref_count(), 0);
    assert_eq!(mock.live_channels(), 0);
}

#[test]
fn test_invalid_config_never_touches_driver() {
    init_tracing();
    let mock = MockGrabber::new();
    let session = DriverSession::new(mock.clone());

    let err = Channel::open(&session, ChannelConfig::new(0, "", "NTSC")).unwrap_err();
    assert!(matches!(err, GrabberError::InvalidConfig { .. }));
    assert_eq!(mock.open_count(), 0);
}

#[test]
fn test_start_while_active_is_rejected() {
    let (mock, _session, channel) = open_channel();

    channel.start().unwrap();
    assert_eq!(channel.state(), ChannelState::Active);
    assert!(channel.is_running());

    let err = channel.start().unwrap_err();
    assert!(matches!(
        err,
        GrabberError::InvalidState {
            actual: ChannelState::Active,
            ..
        }
    ));

    channel.stop().unwrap();
    assert_eq!(mock.channel_states(channel.handle()), vec![READY, ACTIVE, IDLE]);
}

#[test]
fn test_stop_is_bounded_and_idempotent() {
    let (mock, _session, channel) = open_channel();
    channel.start().unwrap();

    let started = Instant::now();
    channel.stop().unwrap();
    assert!(started.elapsed() < channel.config().stop_timeout());
    assert_eq!(channel.state(), ChannelState::Idle);
    assert!(!channel.is_running());

    let journal_len = mock.journal().len();
    channel.stop().unwrap();
    channel.stop().unwrap();
    assert_eq!(mock.journal().len(), journal_len);
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[test]
fn test_stop_before_start_has_no_effect() {
    let (mock, _session, channel) = open_channel();

    channel.stop().unwrap();
    assert_eq!(channel.state(), ChannelState::Ready);
    assert_eq!(mock.channel_states(channel.handle()), vec![READY]);

    // Still startable
    channel.start().unwrap();
    channel.stop().unwrap();
}

#[test]
fn test_restart_after_stop() {
    let (mock, _session, channel) = open_channel();

    channel.start().unwrap();
    channel.stop().unwrap();
    channel.start().unwrap();
    assert_eq!(channel.state(), ChannelState::Active);
    channel.stop().unwrap();

    assert_eq!(
        mock.channel_states(channel.handle()),
        vec![READY, ACTIVE, IDLE, ACTIVE, IDLE]
    );
}

#[test]
fn test_restart_after_end_of_activity() {
    let (mock, _session, channel) = open_channel();

    mock.push_signal(daq_driver_grabber::MockSignal::EndOfActivity);
    channel.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || !channel.is_running()));
    assert_eq!(channel.state(), ChannelState::Idle);

    // The finished thread is reaped by the next start
    channel.start().unwrap();
    assert!(channel.is_running());
    channel.stop().unwrap();
}

#[test]
fn test_dispose_without_start_is_idempotent() {
    let (mock, session, channel) = open_channel();

    channel.dispose().unwrap();
    channel.dispose().unwrap();

    assert_eq!(channel.state(), ChannelState::Disposed);
    assert_eq!(mock.live_channels(), 0);
    assert_eq!(session.ref_count(), 0);
    assert_eq!(mock.close_count(), 1);

    assert!(matches!(channel.start(), Err(GrabberError::Disposed)));
    assert!(matches!(
        channel.add_observer(|_: &FrameDescriptor<'_>| {}),
        Err(GrabberError::Disposed)
    ));
    channel.stop().unwrap();
}

#[test]
fn test_dispose_stops_running_channel() {
    let (mock, session, channel) = open_channel();
    channel.start().unwrap();

    channel.dispose().unwrap();

    assert_eq!(channel.state(), ChannelState::Disposed);
    assert!(!channel.is_running());
    assert_eq!(mock.channel_states(channel.handle()), vec![READY, ACTIVE, IDLE]);
    assert_eq!(session.ref_count(), 0);

    // Idle is set before the channel object is deleted
    let journal = mock.journal();
    let idle = journal
        .iter()
        .position(|c| matches!(c, MockCall::ChannelState { value, .. } if *value == IDLE))
        .unwrap();
    let delete = journal
        .iter()
        .position(|c| matches!(c, MockCall::Delete(_)))
        .unwrap();
    assert!(idle < delete);
}

#[test]
fn test_drop_disposes() {
    let (mock, session, channel) = open_channel();
    channel.start().unwrap();
    drop(channel);

    assert_eq!(mock.live_channels(), 0);
    assert_eq!(session.ref_count(), 0);
    assert!(!mock.is_driver_open());
}
