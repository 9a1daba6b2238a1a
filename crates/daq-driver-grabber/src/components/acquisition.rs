//! Acquisition Loop
//!
//! Each started channel owns one capture thread running [`SignalWaiter::run`].
//! The loop blocks on the native wait call with a fixed timeout and handles
//! whatever signal arrives:
//!
//! - frame-ready: dispatch to observers, then hand the buffer back (Filled -> Free)
//! - acquisition-failure: counted and published, the loop keeps going
//! - end-of-activity: sets the stop flag, the loop exits after this iteration
//! - anything else: ignored
//!
//! A failing wait call ends the loop. However the loop ends (normal stop,
//! fatal error, observer panic) the [`IdleOnExit`] guard puts the native
//! channel back into Idle, leaves the stop flag set, and wakes anyone waiting
//! in [`AcquisitionShared::wait_finished`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::api::{empty_signal_info, GrabberApi, Handle, Param, STATUS_OK, STATUS_TIMEOUT};
use crate::channel::ChannelState;
use crate::components::dispatch::{FrameDispatcher, ObserverList};
use crate::components::session::SessionGuard;
use crate::components::signal::{SignalEvent, SignalKind};
use crate::error::{ErrorReporter, Result};

/// Capacity of the per-channel event channel.
pub(crate) const EVENT_CAPACITY: usize = 64;

/// Notification about the acquisition loop, separate from the frame hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The capture thread is running.
    Started,
    /// The grabber reported a failed acquisition; `count` is the running total.
    AcquisitionFailure { count: u64 },
    /// The native channel signalled end of activity.
    EndOfActivity,
    /// The loop ended on an error.
    LoopFailed { message: String },
    /// The capture thread has exited; `frames` is the total delivered so far.
    Stopped { frames: u64 },
}

/// Snapshot of a channel's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Frames handed to observers
    pub frames_dispatched: u64,
    /// Buffers returned to the native pool
    pub buffers_released: u64,
    /// Acquisition-failure signals received
    pub acquisition_failures: u64,
    /// Waits that timed out with no signal
    pub wait_timeouts: u64,
    /// Signals of an unrecognised kind
    pub unknown_signals: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    frames_dispatched: AtomicU64,
    buffers_released: AtomicU64,
    acquisition_failures: AtomicU64,
    wait_timeouts: AtomicU64,
    unknown_signals: AtomicU64,
}

impl StatCounters {
    pub(crate) fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            frames_dispatched: self.frames_dispatched.load(Ordering::SeqCst),
            buffers_released: self.buffers_released.load(Ordering::SeqCst),
            acquisition_failures: self.acquisition_failures.load(Ordering::SeqCst),
            wait_timeouts: self.wait_timeouts.load(Ordering::SeqCst),
            unknown_signals: self.unknown_signals.load(Ordering::SeqCst),
        }
    }
}

/// State shared between a channel and its capture thread.
pub(crate) struct AcquisitionShared {
    pub(crate) api: Arc<dyn GrabberApi>,
    pub(crate) instance: Handle,
    pub(crate) stop: AtomicBool,
    pub(crate) state: Mutex<ChannelState>,
    pub(crate) stats: StatCounters,
    pub(crate) events: broadcast::Sender<ChannelEvent>,
    pub(crate) observers: ObserverList,
    pub(crate) wait_timeout: Duration,
    sequence: AtomicU64,
    capture_thread: Mutex<Option<ThreadId>>,
    finished: Mutex<bool>,
    finished_cv: Condvar,
    /// Session reference handed over by a channel dropped on its own capture thread.
    retired: Mutex<Option<SessionGuard>>,
}

impl AcquisitionShared {
    pub(crate) fn new(
        api: Arc<dyn GrabberApi>,
        instance: Handle,
        state: ChannelState,
        wait_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            api,
            instance,
            stop: AtomicBool::new(true),
            state: Mutex::new(state),
            stats: StatCounters::default(),
            events,
            observers: Arc::new(Mutex::new(Vec::new())),
            wait_timeout,
            sequence: AtomicU64::new(0),
            capture_thread: Mutex::new(None),
            finished: Mutex::new(true),
            finished_cv: Condvar::new(),
            retired: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Publish an event. Having no subscribers is fine.
    pub(crate) fn publish(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Whether the caller is running on the current (or last) capture thread.
    pub(crate) fn on_capture_thread(&self) -> bool {
        *self.capture_thread.lock() == Some(thread::current().id())
    }

    /// Leave teardown to the capture thread: stop the loop and let its exit
    /// guard delete the native channel and release `session`.
    pub(crate) fn retire(&self, session: Option<SessionGuard>) {
        self.request_stop();
        *self.retired.lock() = session;
    }

    /// Arm the finished flag before a capture thread is spawned.
    pub(crate) fn reset_finished(&self) {
        *self.finished.lock() = false;
    }

    pub(crate) fn mark_finished(&self) {
        let mut finished = self.finished.lock();
        *finished = true;
        self.finished_cv.notify_all();
    }

    pub(crate) fn is_finished(&self) -> bool {
        *self.finished.lock()
    }

    /// Wait up to `timeout` for the capture thread to run its cleanup.
    pub(crate) fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut finished = self.finished.lock();
        while !*finished {
            if self.finished_cv.wait_until(&mut finished, deadline).timed_out() {
                return *finished;
            }
        }
        true
    }
}

/// Runs on the capture thread until the stop flag is set.
pub(crate) struct SignalWaiter {
    shared: Arc<AcquisitionShared>,
    dispatcher: FrameDispatcher,
    timeout_ms: u32,
}

impl SignalWaiter {
    pub(crate) fn new(shared: Arc<AcquisitionShared>) -> Self {
        let dispatcher = FrameDispatcher::new(
            Arc::clone(&shared.api),
            shared.instance,
            Arc::clone(&shared.observers),
        );
        let timeout_ms = u32::try_from(shared.wait_timeout.as_millis()).unwrap_or(u32::MAX);
        Self {
            shared,
            dispatcher,
            timeout_ms,
        }
    }

    /// Loop body. The native channel must already be Active.
    pub(crate) fn run(self) {
        *self.shared.capture_thread.lock() = Some(thread::current().id());
        let _cleanup = IdleOnExit {
            shared: Arc::clone(&self.shared),
        };

        debug!(instance = %self.shared.instance, "Capture thread started");
        self.shared.publish(ChannelEvent::Started);

        if let Err(e) = self.poll() {
            error!(instance = %self.shared.instance, error = %e, "Acquisition loop failed");
            self.shared.publish(ChannelEvent::LoopFailed {
                message: e.to_string(),
            });
        }
    }

    fn poll(&self) -> Result<()> {
        let api = self.shared.api.as_ref();
        let instance = self.shared.instance;

        while !self.shared.stop_requested() {
            let mut raw = empty_signal_info();
            match api.wait_signal(instance, self.timeout_ms, &mut raw) {
                STATUS_OK => {}
                STATUS_TIMEOUT => {
                    self.shared.stats.wait_timeouts.fetch_add(1, Ordering::SeqCst);
                    trace!(instance = %instance, "No signal within wait timeout");
                    continue;
                }
                status => return Err(ErrorReporter::new(api).signal_wait(status)),
            }

            self.handle(SignalEvent::decode(&raw))?;
        }

        Ok(())
    }

    fn handle(&self, event: SignalEvent) -> Result<()> {
        match event.kind {
            SignalKind::FrameReady => self.deliver(event.buffer),
            SignalKind::AcquisitionFailure => {
                let count = self
                    .shared
                    .stats
                    .acquisition_failures
                    .fetch_add(1, Ordering::SeqCst)
                    + 1;
                warn!(instance = %self.shared.instance, count, "Grabber reported acquisition failure");
                self.shared.publish(ChannelEvent::AcquisitionFailure { count });
                Ok(())
            }
            SignalKind::EndOfActivity => {
                info!(instance = %self.shared.instance, "End of channel activity");
                self.shared.request_stop();
                self.shared.publish(ChannelEvent::EndOfActivity);
                Ok(())
            }
            SignalKind::Other(raw) => {
                self.shared.stats.unknown_signals.fetch_add(1, Ordering::SeqCst);
                debug!(instance = %self.shared.instance, signal = raw, "Ignoring unknown signal");
                Ok(())
            }
        }
    }

    /// Dispatch the frame in `buffer`, then return the buffer to the pool.
    ///
    /// The buffer is freed even when dispatch fails or an observer panics;
    /// dispatch and release errors are both fatal.
    fn deliver(&self, buffer: Handle) -> Result<()> {
        let filled = FilledBuffer {
            shared: &self.shared,
            buffer,
            armed: true,
        };

        let sequence = self.shared.sequence.fetch_add(1, Ordering::SeqCst);
        let dispatched = self.dispatcher.dispatch(buffer, sequence);
        if dispatched.is_ok() {
            self.shared.stats.frames_dispatched.fetch_add(1, Ordering::SeqCst);
        }

        let released = filled.release();
        dispatched?;
        released
    }
}

/// A Filled surface owed back to the native pool. Freed on drop if
/// [`FilledBuffer::release`] was never reached.
struct FilledBuffer<'a> {
    shared: &'a AcquisitionShared,
    buffer: Handle,
    armed: bool,
}

impl FilledBuffer<'_> {
    fn release(mut self) -> Result<()> {
        self.armed = false;
        self.free()
    }

    fn free(&self) -> Result<()> {
        let api = self.shared.api.as_ref();
        let status = api.set_int(
            self.buffer,
            Param::Id(grabber_sys::PARAM_SURFACE_STATE),
            grabber_sys::FG_SURFACE_STATE_FREE,
        );
        ErrorReporter::new(api).buffer_release(status, self.buffer)?;
        self.shared.stats.buffers_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FilledBuffer<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.free() {
            warn!(instance = %self.shared.instance, error = %e, "Failed to free buffer while unwinding");
        }
    }
}

/// Exit guard for the capture thread. Runs on return and on unwind.
struct IdleOnExit {
    shared: Arc<AcquisitionShared>,
}

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        let shared = &self.shared;
        shared.request_stop();

        let api = shared.api.as_ref();
        let status = api.set_int(
            shared.instance,
            Param::Id(grabber_sys::PARAM_CHANNEL_STATE),
            grabber_sys::FG_CHANNEL_STATE_IDLE,
        );
        if status != STATUS_OK {
            warn!(
                instance = %shared.instance,
                code = status,
                message = %ErrorReporter::new(api).describe(status),
                "Failed to return channel to Idle"
            );
        }

        {
            let mut state = shared.state.lock();
            if *state == ChannelState::Active {
                *state = ChannelState::Idle;
            }
        }

        let retired = shared.retired.lock().take();
        if let Some(session) = retired {
            dispose_retired(shared, session);
        }

        if thread::panicking() {
            error!(instance = %shared.instance, "Frame observer panicked; capture thread unwinding");
            shared.publish(ChannelEvent::LoopFailed {
                message: "frame observer panicked".to_string(),
            });
        }

        let frames = shared.stats.frames_dispatched.load(Ordering::SeqCst);
        debug!(instance = %shared.instance, frames, "Capture thread exiting");
        shared.publish(ChannelEvent::Stopped { frames });
        shared.mark_finished();
    }
}

/// Teardown for a channel whose owner went away on the capture thread.
fn dispose_retired(shared: &AcquisitionShared, session: SessionGuard) {
    let api = shared.api.as_ref();
    let status = api.delete(shared.instance);
    if status != STATUS_OK {
        warn!(
            instance = %shared.instance,
            code = status,
            message = %ErrorReporter::new(api).describe(status),
            "Failed to delete channel"
        );
    }
    shared.set_state(ChannelState::Disposed);
    shared.observers.lock().clear();

    if let Err(e) = session.release() {
        warn!(instance = %shared.instance, error = %e, "Failed to release driver session");
    }
    info!(instance = %shared.instance, "Channel disposed from capture thread");
}
