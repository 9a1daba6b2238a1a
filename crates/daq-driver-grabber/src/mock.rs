//! Scripted in-process grabber.
//!
//! [`MockGrabber`] implements [`GrabberApi`] without hardware. Tests push
//! [`MockSignal`]s onto a script that `wait_signal` hands out in order, and
//! inspect a journal of the calls the driver made. For demos the mock can
//! also generate frames on its own at a fixed period over a small pool of
//! surfaces, raising acquisition-failure when the next surface is still
//! filled.

use std::collections::{HashMap, VecDeque};
use std::ffi::c_void;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::api::{GrabberApi, Handle, Param, RawSignalInfo, Status, STATUS_OK};

/// First handle handed out for channels.
const CHANNEL_HANDLE_BASE: u32 = 0x4000_0001;

/// First handle of the auto-stream surface pool.
const STREAM_SURFACE_BASE: u32 = 0x5000_0000;

/// Oldest journal entries are dropped beyond this.
const JOURNAL_LIMIT: usize = 100_000;

/// One scripted outcome of `wait_signal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSignal {
    /// Mark the surface Filled and deliver frame-ready for it
    FrameReady(Handle),
    /// Deliver acquisition-failure
    AcquisitionFailure,
    /// Deliver end-of-activity
    EndOfActivity,
    /// Deliver a signal with an arbitrary identifier
    Other(i32),
    /// Return the timeout status immediately
    Timeout,
    /// Return this status from the wait call
    WaitError(Status),
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum MockCall {
    OpenDriver,
    CloseDriver,
    Create { model: String, instance: Handle },
    Delete(Handle),
    /// Integer parameter write; `param` is the [`Param`] display form
    SetInt { target: Handle, param: String, value: i32 },
    SetStr { target: Handle, param: String, value: String },
    /// A surface was moved Filled -> Free
    FreeBuffer(Handle),
    /// The channel state parameter was written
    ChannelState { instance: Handle, value: i32 },
    /// Caller-supplied marker, see [`MockGrabber::note`]
    Note(String),
}

#[derive(Debug, Default)]
struct MockChannel {
    ints: HashMap<String, i32>,
    strs: HashMap<String, String>,
    state: i32,
}

#[derive(Debug)]
struct Surface {
    state: i32,
    data: Box<[u8]>,
}

impl Surface {
    /// A free surface of `len` bytes filled with the handle's low byte.
    fn new(handle: Handle, len: usize) -> Self {
        Self {
            state: grabber_sys::FG_SURFACE_STATE_FREE,
            data: vec![handle.raw() as u8; len].into_boxed_slice(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Geometry {
    width: i32,
    height: i32,
    pitch: i32,
}

#[derive(Debug)]
struct Stream {
    period: Duration,
    pool: u32,
    next_surface: u32,
    next_at: Instant,
}

#[derive(Debug, Default)]
struct Failures {
    open: Option<Status>,
    close: Option<Status>,
    create: Option<Status>,
    params: HashMap<String, Status>,
}

#[derive(Debug)]
struct MockState {
    open_count: u32,
    close_count: u32,
    driver_open: bool,
    next_handle: u32,
    channels: HashMap<Handle, MockChannel>,
    surfaces: HashMap<Handle, Surface>,
    script: VecDeque<MockSignal>,
    journal: VecDeque<MockCall>,
    failures: Failures,
    descriptions: HashMap<u32, String>,
    geometry: Geometry,
    stream: Option<Stream>,
}

impl MockState {
    fn record(&mut self, call: MockCall) {
        if self.journal.len() >= JOURNAL_LIMIT {
            self.journal.pop_front();
        }
        self.journal.push_back(call);
    }

    fn param_failure(&self, param: &Param<'_>) -> Option<Status> {
        self.failures.params.get(&param.to_string()).copied()
    }

    fn frame_bytes(&self) -> usize {
        self.geometry.pitch.max(0) as usize * self.geometry.height.max(0) as usize
    }

    fn fill_surface(&mut self, handle: Handle) {
        let len = self.frame_bytes();
        let surface = self
            .surfaces
            .entry(handle)
            .or_insert_with(|| Surface::new(handle, len));
        if surface.data.len() < len {
            *surface = Surface::new(handle, len);
        }
        surface.state = grabber_sys::FG_SURFACE_STATE_FILLED;
    }

    fn is_filled(&self, handle: Handle) -> bool {
        self.surfaces
            .get(&handle)
            .is_some_and(|s| s.state == grabber_sys::FG_SURFACE_STATE_FILLED)
    }
}

/// Scripted fake of the native grabber API.
#[derive(Debug)]
pub struct MockGrabber {
    state: Mutex<MockState>,
    signal_cv: Condvar,
}

impl MockGrabber {
    /// A fresh mock with 640x480 RGB24 geometry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                open_count: 0,
                close_count: 0,
                driver_open: false,
                next_handle: CHANNEL_HANDLE_BASE,
                channels: HashMap::new(),
                surfaces: HashMap::new(),
                script: VecDeque::new(),
                journal: VecDeque::new(),
                failures: Failures::default(),
                descriptions: HashMap::new(),
                geometry: Geometry {
                    width: 640,
                    height: 480,
                    pitch: 640 * 3,
                },
                stream: None,
            }),
            signal_cv: Condvar::new(),
        })
    }

    /// Set the geometry reported for every channel.
    pub fn set_geometry(&self, width: i32, height: i32, pitch: i32) {
        self.state.lock().geometry = Geometry {
            width,
            height,
            pitch,
        };
    }

    /// Append a signal to the wait script and wake a blocked waiter.
    pub fn push_signal(&self, signal: MockSignal) {
        self.state.lock().script.push_back(signal);
        self.signal_cv.notify_all();
    }

    /// Append several signals in order.
    pub fn push_signals<I>(&self, signals: I)
    where
        I: IntoIterator<Item = MockSignal>,
    {
        self.state.lock().script.extend(signals);
        self.signal_cv.notify_all();
    }

    /// Generate a frame every `period` on active channels, cycling over
    /// `pool` surfaces. Scripted signals still take precedence.
    pub fn start_stream(&self, period: Duration, pool: u32) {
        self.state.lock().stream = Some(Stream {
            period,
            pool: pool.max(1),
            next_surface: 0,
            next_at: Instant::now() + period,
        });
        self.signal_cv.notify_all();
    }

    /// Stop generating frames.
    pub fn stop_stream(&self) {
        self.state.lock().stream = None;
    }

    /// Make the next driver opens fail with `status`.
    pub fn fail_open_driver(&self, status: Status) {
        self.state.lock().failures.open = Some(status);
    }

    /// Make driver close fail with `status`.
    pub fn fail_close_driver(&self, status: Status) {
        self.state.lock().failures.close = Some(status);
    }

    /// Make channel creation fail with `status`.
    pub fn fail_create(&self, status: Status) {
        self.state.lock().failures.create = Some(status);
    }

    /// Make every get/set of `param` fail with `status`.
    pub fn fail_param(&self, param: Param<'_>, status: Status) {
        self.state
            .lock()
            .failures
            .params
            .insert(param.to_string(), status);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures = Failures::default();
    }

    /// Description text returned for `code`.
    pub fn set_error_description(&self, code: Status, text: impl Into<String>) {
        self.state
            .lock()
            .descriptions
            .insert(code.unsigned_abs(), text.into());
    }

    /// Add a marker to the journal (e.g. from a frame observer).
    pub fn note(&self, text: impl Into<String>) {
        self.state.lock().record(MockCall::Note(text.into()));
    }

    /// Scripted signals not yet handed out.
    pub fn pending_signals(&self) -> usize {
        self.state.lock().script.len()
    }

    /// Number of driver open attempts.
    pub fn open_count(&self) -> u32 {
        self.state.lock().open_count
    }

    /// Number of driver close calls.
    pub fn close_count(&self) -> u32 {
        self.state.lock().close_count
    }

    /// Whether the driver is currently open.
    pub fn is_driver_open(&self) -> bool {
        self.state.lock().driver_open
    }

    /// Number of channels created and not yet deleted.
    pub fn live_channels(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Recorded calls, oldest first.
    pub fn journal(&self) -> Vec<MockCall> {
        self.state.lock().journal.iter().cloned().collect()
    }

    /// Surfaces returned to the pool, in order.
    pub fn freed_buffers(&self) -> Vec<Handle> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|call| match call {
                MockCall::FreeBuffer(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    /// Values written to the channel state parameter of `instance`, in order.
    pub fn channel_states(&self, instance: Handle) -> Vec<i32> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|call| match call {
                MockCall::ChannelState { instance: i, value } if *i == instance => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Integer parameter last written on `instance`.
    pub fn channel_int(&self, instance: Handle, param: Param<'_>) -> Option<i32> {
        self.state
            .lock()
            .channels
            .get(&instance)
            .and_then(|c| c.ints.get(&param.to_string()).copied())
    }

    /// String parameter last written on `instance`.
    pub fn channel_str(&self, instance: Handle, param: Param<'_>) -> Option<String> {
        self.state
            .lock()
            .channels
            .get(&instance)
            .and_then(|c| c.strs.get(&param.to_string()).cloned())
    }

    /// Current state of a surface, if it exists.
    pub fn surface_state(&self, buffer: Handle) -> Option<i32> {
        self.state.lock().surfaces.get(&buffer).map(|s| s.state)
    }

    fn deliver(
        state: &mut MockState,
        instance: Handle,
        signal: MockSignal,
        info: &mut RawSignalInfo,
    ) -> Status {
        let (kind, buffer) = match signal {
            MockSignal::FrameReady(buffer) => {
                state.fill_surface(buffer);
                (grabber_sys::FG_SIG_SURFACE_FILLED, buffer.raw())
            }
            MockSignal::AcquisitionFailure => (grabber_sys::FG_SIG_ACQUISITION_FAILURE, 0),
            MockSignal::EndOfActivity => (grabber_sys::FG_SIG_END_CHANNEL_ACTIVITY, 0),
            MockSignal::Other(raw) => (raw, 0),
            MockSignal::Timeout => return grabber_sys::FG_TIMEOUT,
            MockSignal::WaitError(status) => return status,
        };
        info.Instance = instance.raw();
        info.Signal = kind;
        info.SignalInfo = buffer;
        info.SignalContext = 0;
        STATUS_OK
    }

    /// Next auto-stream signal if one is due, or the time it will be.
    fn stream_tick(
        state: &mut MockState,
        instance: Handle,
        now: Instant,
    ) -> Result<MockSignal, Option<Instant>> {
        let active = state
            .channels
            .get(&instance)
            .is_some_and(|c| c.state == grabber_sys::FG_CHANNEL_STATE_ACTIVE);
        let Some(stream) = state.stream.as_mut() else {
            return Err(None);
        };
        if !active {
            return Err(None);
        }
        if now < stream.next_at {
            return Err(Some(stream.next_at));
        }

        stream.next_at = now + stream.period;
        let buffer = Handle(STREAM_SURFACE_BASE + stream.next_surface);
        if state.is_filled(buffer) {
            return Ok(MockSignal::AcquisitionFailure);
        }
        if let Some(stream) = state.stream.as_mut() {
            stream.next_surface = (stream.next_surface + 1) % stream.pool;
        }
        Ok(MockSignal::FrameReady(buffer))
    }
}

impl GrabberApi for MockGrabber {
    fn open_driver(&self) -> Status {
        let mut state = self.state.lock();
        state.open_count += 1;
        if let Some(status) = state.failures.open {
            return status;
        }
        state.driver_open = true;
        state.record(MockCall::OpenDriver);
        STATUS_OK
    }

    fn close_driver(&self) -> Status {
        let mut state = self.state.lock();
        state.close_count += 1;
        state.driver_open = false;
        state.record(MockCall::CloseDriver);
        state.failures.close.unwrap_or(STATUS_OK)
    }

    fn create_channel(&self, model: &str, instance: &mut Handle) -> Status {
        let mut state = self.state.lock();
        if let Some(status) = state.failures.create {
            return status;
        }
        if !state.driver_open {
            return grabber_sys::FG_INVALID_STATE;
        }
        let handle = Handle(state.next_handle);
        state.next_handle += 1;
        state.channels.insert(handle, MockChannel::default());
        state.record(MockCall::Create {
            model: model.to_string(),
            instance: handle,
        });
        *instance = handle;
        STATUS_OK
    }

    fn delete(&self, instance: Handle) -> Status {
        let mut state = self.state.lock();
        if state.channels.remove(&instance).is_none() {
            return grabber_sys::FG_INVALID_HANDLE;
        }
        state.record(MockCall::Delete(instance));
        STATUS_OK
    }

    fn set_int(&self, target: Handle, param: Param<'_>, value: i32) -> Status {
        let mut state = self.state.lock();
        if let Some(status) = state.param_failure(&param) {
            return status;
        }

        if param == Param::Id(grabber_sys::PARAM_SURFACE_STATE) {
            let Some(surface) = state.surfaces.get_mut(&target) else {
                return grabber_sys::FG_INVALID_HANDLE;
            };
            surface.state = value;
            if value == grabber_sys::FG_SURFACE_STATE_FREE {
                state.record(MockCall::FreeBuffer(target));
            }
            return STATUS_OK;
        }

        let Some(channel) = state.channels.get_mut(&target) else {
            return grabber_sys::FG_INVALID_HANDLE;
        };
        if param == Param::Id(grabber_sys::PARAM_CHANNEL_STATE) {
            channel.state = value;
            state.record(MockCall::ChannelState {
                instance: target,
                value,
            });
            drop(state);
            self.signal_cv.notify_all();
            return STATUS_OK;
        }

        channel.ints.insert(param.to_string(), value);
        state.record(MockCall::SetInt {
            target,
            param: param.to_string(),
            value,
        });
        STATUS_OK
    }

    fn set_str(&self, target: Handle, param: Param<'_>, value: &str) -> Status {
        let mut state = self.state.lock();
        if let Some(status) = state.param_failure(&param) {
            return status;
        }
        let Some(channel) = state.channels.get_mut(&target) else {
            return grabber_sys::FG_INVALID_HANDLE;
        };
        channel.strs.insert(param.to_string(), value.to_string());
        state.record(MockCall::SetStr {
            target,
            param: param.to_string(),
            value: value.to_string(),
        });
        STATUS_OK
    }

    fn get_int(&self, target: Handle, param: Param<'_>, value: &mut i32) -> Status {
        let state = self.state.lock();
        if let Some(status) = state.param_failure(&param) {
            return status;
        }
        let Some(channel) = state.channels.get(&target) else {
            return grabber_sys::FG_INVALID_HANDLE;
        };
        let geometry = state.geometry;
        *value = match param {
            Param::Id(grabber_sys::PARAM_IMAGE_SIZE_X) => geometry.width,
            Param::Id(grabber_sys::PARAM_IMAGE_SIZE_Y) => geometry.height,
            Param::Id(grabber_sys::PARAM_BUFFER_PITCH) => geometry.pitch,
            Param::Id(grabber_sys::PARAM_CHANNEL_STATE) => channel.state,
            other => match channel.ints.get(&other.to_string()) {
                Some(v) => *v,
                None => return grabber_sys::FG_BAD_PARAMETER,
            },
        };
        STATUS_OK
    }

    fn get_ptr(&self, target: Handle, param: Param<'_>, value: &mut *mut c_void) -> Status {
        let mut state = self.state.lock();
        if let Some(status) = state.param_failure(&param) {
            return status;
        }
        if param != Param::Id(grabber_sys::PARAM_SURFACE_ADDR) {
            return grabber_sys::FG_BAD_PARAMETER;
        }
        let len = state.frame_bytes();
        let Some(surface) = state.surfaces.get_mut(&target) else {
            return grabber_sys::FG_INVALID_HANDLE;
        };
        if surface.data.len() < len {
            let state = surface.state;
            *surface = Surface::new(target, len);
            surface.state = state;
        }
        *value = surface.data.as_mut_ptr().cast::<c_void>();
        STATUS_OK
    }

    fn get_str(&self, target: Handle, param: Param<'_>, buf: &mut [u8]) -> Status {
        let state = self.state.lock();
        if let Some(status) = state.param_failure(&param) {
            return status;
        }

        let text = match param {
            Param::Id(id) if target == Handle::CONFIGURATION && id >= grabber_sys::PARAM_ERROR_DESC => {
                state.descriptions.get(&(id - grabber_sys::PARAM_ERROR_DESC)).cloned()
            }
            other => state
                .channels
                .get(&target)
                .and_then(|c| c.strs.get(&other.to_string()).cloned()),
        };
        let Some(text) = text else {
            return grabber_sys::FG_BAD_PARAMETER;
        };
        let Some(room) = buf.len().checked_sub(1) else {
            return grabber_sys::FG_OUT_OF_BOUND;
        };
        let n = text.len().min(room);
        buf[..n].copy_from_slice(&text.as_bytes()[..n]);
        buf[n] = 0;
        STATUS_OK
    }

    fn wait_signal(&self, instance: Handle, timeout_ms: u32, info: &mut RawSignalInfo) -> Status {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut state = self.state.lock();
        if !state.channels.contains_key(&instance) {
            return grabber_sys::FG_INVALID_HANDLE;
        }

        loop {
            if let Some(signal) = state.script.pop_front() {
                return Self::deliver(&mut state, instance, signal, info);
            }

            let now = Instant::now();
            let wake_at = match Self::stream_tick(&mut state, instance, now) {
                Ok(signal) => return Self::deliver(&mut state, instance, signal, info),
                Err(Some(next_at)) => next_at.min(deadline),
                Err(None) => deadline,
            };
            if now >= deadline {
                return grabber_sys::FG_TIMEOUT;
            }
            let _ = self.signal_cv.wait_until(&mut state, wake_at);
        }
    }
}
