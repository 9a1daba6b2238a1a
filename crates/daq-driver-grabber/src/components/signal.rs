//! Signal decoding.
//!
//! The native wait call fills a fixed-layout [`RawSignalInfo`] record. This is
//! the only place that reads it; everything downstream works with
//! [`SignalEvent`].

use crate::api::{Handle, RawSignalInfo};

/// Kind of a delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// A surface (buffer) has been filled with a frame
    FrameReady,
    /// The grabber failed to acquire a frame
    AcquisitionFailure,
    /// The channel finished its activity
    EndOfActivity,
    /// Anything else
    Other(i32),
}

impl SignalKind {
    /// The signal classes a channel enables, all with blocking-wait delivery.
    pub const ARMED: [SignalKind; 3] = [
        SignalKind::FrameReady,
        SignalKind::AcquisitionFailure,
        SignalKind::EndOfActivity,
    ];

    /// Convert from the native signal identifier.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            grabber_sys::FG_SIG_SURFACE_FILLED => Self::FrameReady,
            grabber_sys::FG_SIG_ACQUISITION_FAILURE => Self::AcquisitionFailure,
            grabber_sys::FG_SIG_END_CHANNEL_ACTIVITY => Self::EndOfActivity,
            other => Self::Other(other),
        }
    }

    /// Native signal identifier.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::FrameReady => grabber_sys::FG_SIG_SURFACE_FILLED,
            Self::AcquisitionFailure => grabber_sys::FG_SIG_ACQUISITION_FAILURE,
            Self::EndOfActivity => grabber_sys::FG_SIG_END_CHANNEL_ACTIVITY,
            Self::Other(raw) => raw,
        }
    }
}

/// A decoded signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEvent {
    /// What happened
    pub kind: SignalKind,
    /// Channel the signal was raised on
    pub instance: Handle,
    /// Originating surface; meaningful only for [`SignalKind::FrameReady`]
    pub buffer: Handle,
    /// Opaque user context, passed through unexamined
    pub context: usize,
    /// Opaque signal context, passed through unexamined
    pub signal_context: u32,
}

impl SignalEvent {
    /// Decode a native signal record.
    pub fn decode(raw: &RawSignalInfo) -> Self {
        Self {
            kind: SignalKind::from_raw(raw.Signal),
            instance: Handle(raw.Instance),
            buffer: Handle(raw.SignalInfo),
            context: raw.Context as usize,
            signal_context: raw.SignalContext,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::empty_signal_info;

    #[test]
    fn test_kind_round_trip() {
        for kind in SignalKind::ARMED {
            assert_eq!(SignalKind::from_raw(kind.to_raw()), kind);
        }
        assert_eq!(SignalKind::from_raw(99), SignalKind::Other(99));
    }

    #[test]
    fn test_decode_frame_ready() {
        let mut raw = empty_signal_info();
        raw.Instance = 0x4000_0001;
        raw.Signal = grabber_sys::FG_SIG_SURFACE_FILLED;
        raw.SignalInfo = 0x5000_0007;
        raw.SignalContext = 3;

        let event = SignalEvent::decode(&raw);
        assert_eq!(event.kind, SignalKind::FrameReady);
        assert_eq!(event.instance, Handle(0x4000_0001));
        assert_eq!(event.buffer, Handle(0x5000_0007));
        assert_eq!(event.context, 0);
        assert_eq!(event.signal_context, 3);
    }
}
