//! Acquisition channel.
//!
//! A [`Channel`] is one acquisition pipeline bound to a single video source.
//! Opening it takes a reference on the [`DriverSession`], creates and
//! configures the native channel object, arms the three signals the capture
//! loop waits on, and pre-arms the channel into Ready.
//!
//! ```text
//! Created -> Configured -> Ready -> Active -> Idle -> (Active ...) -> Disposed
//! ```
//!
//! [`Channel::start`] moves the native channel to Active and spawns the
//! capture thread. [`Channel::stop`] is cooperative: it sets the stop flag and
//! waits (bounded) for the thread to notice, which takes at most one wait
//! timeout. [`Channel::dispose`] stops, deletes the native object, and
//! releases the session; it is idempotent and also runs on drop.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::api::{GrabberApi, Handle, Param, STATUS_OK};
use crate::components::acquisition::{AcquisitionShared, ChannelEvent, ChannelStats, SignalWaiter};
use crate::components::dispatch::FrameObserver;
use crate::components::session::{DriverSession, SessionGuard};
use crate::components::signal::SignalKind;
use crate::error::{ErrorReporter, GrabberError, Result};

/// Name of the string parameter selecting the input connector.
pub const CONNECTOR_PARAM: &str = "Connector";

/// Name of the string parameter selecting the video standard.
pub const STANDARD_PARAM: &str = "Standard";

/// Lifecycle state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Native object exists, nothing applied yet
    Created,
    /// Source, format and signals applied
    Configured,
    /// Pre-armed, ready to start
    Ready,
    /// Capture thread running
    Active,
    /// Stopped after a run; can be started again
    Idle,
    /// Released; unusable
    Disposed,
}

impl ChannelState {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Disposed => "disposed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel configuration.
///
/// Pixel format (RGB24), acquisition mode (continuous), trigger (immediate
/// with repeat) and sequence length (indefinite) are fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Native channel model name
    #[serde(default = "default_model")]
    pub model: String,
    /// Capture source index on the board
    #[serde(default)]
    pub source_index: i32,
    /// Input connector name (e.g. "VID1")
    pub connector: String,
    /// Video standard name (e.g. "NTSC", "PAL")
    pub standard: String,
    /// Timeout of one blocking signal wait
    #[serde(default = "default_wait_timeout", with = "humantime_serde")]
    pub wait_timeout: Duration,
    /// Bound on how long stop waits for the capture thread (default: wait timeout + 1s)
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<Duration>,
    /// Capture thread name prefix
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_model() -> String {
    "Channel".to_string()
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_thread_name_prefix() -> String {
    "grabber".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(0, "VID1", "NTSC")
    }
}

impl ChannelConfig {
    /// Configuration for a source with the default model and timeouts.
    pub fn new(source_index: i32, connector: impl Into<String>, standard: impl Into<String>) -> Self {
        Self {
            model: default_model(),
            source_index,
            connector: connector.into(),
            standard: standard.into(),
            wait_timeout: default_wait_timeout(),
            stop_timeout: None,
            thread_name_prefix: default_thread_name_prefix(),
        }
    }

    /// Set the signal wait timeout.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the stop bound explicitly.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Effective bound on stop.
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
            .unwrap_or_else(|| self.wait_timeout + Duration::from_secs(1))
    }

    /// Check the configuration before touching the driver.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| -> Result<()> {
            Err(GrabberError::InvalidConfig {
                message: message.to_string(),
            })
        };
        if self.model.trim().is_empty() {
            return invalid("model must not be empty");
        }
        if self.connector.trim().is_empty() {
            return invalid("connector must not be empty");
        }
        if self.standard.trim().is_empty() {
            return invalid("standard must not be empty");
        }
        // The native wait takes whole milliseconds
        if self.wait_timeout < Duration::from_millis(1) {
            return invalid("wait_timeout must be at least 1ms");
        }
        if self.stop_timeout().is_zero() {
            return invalid("stop_timeout must be greater than zero");
        }
        Ok(())
    }
}

/// One acquisition pipeline bound to a video source.
///
/// # Drop Order
///
/// `shared` (and with it the capture thread's state) is torn down by
/// [`Channel::dispose`] before the session guard is released, so the driver
/// is never closed under a running capture thread. A channel dropped from
/// inside one of its own observers hands its session guard to the capture
/// thread, which deletes the native channel and releases the guard on exit.
pub struct Channel {
    config: ChannelConfig,
    shared: Arc<AcquisitionShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    session: Mutex<Option<SessionGuard>>,
    /// Serialises start, stop and dispose.
    lifecycle: Mutex<()>,
}

impl Channel {
    /// Create, configure and pre-arm a channel.
    ///
    /// On any failure the native object (if created) is deleted and the
    /// session reference is released before the error is returned.
    pub fn open(session: &Arc<DriverSession>, config: ChannelConfig) -> Result<Self> {
        config.validate()?;

        let guard = session.acquire()?;
        let api = Arc::clone(guard.api());

        let mut instance = Handle::default();
        let status = api.create_channel(&config.model, &mut instance);
        if let Err(e) = ErrorReporter::new(api.as_ref())
            .configuration(status, format!("create channel '{}'", config.model))
        {
            release_after_failure(guard);
            return Err(e);
        }

        let shared = Arc::new(AcquisitionShared::new(
            Arc::clone(&api),
            instance,
            ChannelState::Created,
            config.wait_timeout,
        ));
        debug!(instance = %instance, model = %config.model, "Channel created");

        if let Err(e) = configure(api.as_ref(), instance, &config).and_then(|()| {
            shared.set_state(ChannelState::Configured);
            debug!(instance = %instance, "Channel configured");
            pre_arm(api.as_ref(), instance)
        }) {
            error!(instance = %instance, error = %e, "Channel setup failed, rolling back");
            let status = api.delete(instance);
            if status != STATUS_OK {
                warn!(
                    instance = %instance,
                    code = status,
                    message = %ErrorReporter::new(api.as_ref()).describe(status),
                    "Failed to delete channel during rollback"
                );
            }
            release_after_failure(guard);
            return Err(e);
        }
        shared.set_state(ChannelState::Ready);

        info!(
            instance = %instance,
            source = config.source_index,
            connector = %config.connector,
            standard = %config.standard,
            "Channel ready"
        );

        Ok(Self {
            config,
            shared,
            worker: Mutex::new(None),
            session: Mutex::new(Some(guard)),
            lifecycle: Mutex::new(()),
        })
    }

    /// Start capturing.
    ///
    /// Allowed from Ready, or from Idle after a previous run.
    pub fn start(&self) -> Result<()> {
        if self.on_capture_thread() {
            return Err(GrabberError::CaptureThreadReentry { operation: "start" });
        }
        let _lifecycle = self.lifecycle.lock();

        match self.shared.state() {
            ChannelState::Ready | ChannelState::Idle => {}
            ChannelState::Disposed => return Err(GrabberError::Disposed),
            actual => {
                return Err(GrabberError::InvalidState {
                    expected: "ready or idle",
                    actual,
                })
            }
        }

        // A loop that ended on its own leaves a finished thread behind
        self.join_worker(None)?;

        let api = self.shared.api.as_ref();
        let instance = self.shared.instance;
        self.shared.stop.store(false, Ordering::SeqCst);
        let status = api.set_int(
            instance,
            Param::Id(grabber_sys::PARAM_CHANNEL_STATE),
            grabber_sys::FG_CHANNEL_STATE_ACTIVE,
        );
        if let Err(e) = ErrorReporter::new(api).configuration(status, "set channel state Active") {
            self.shared.request_stop();
            return Err(e);
        }
        self.shared.set_state(ChannelState::Active);
        self.shared.reset_finished();

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name_prefix, instance.raw()))
            .spawn(move || SignalWaiter::new(shared).run());

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(instance = %instance, error = %e, "Failed to spawn capture thread");
                self.shared.request_stop();
                let _ = api.set_int(
                    instance,
                    Param::Id(grabber_sys::PARAM_CHANNEL_STATE),
                    grabber_sys::FG_CHANNEL_STATE_IDLE,
                );
                self.shared.set_state(ChannelState::Idle);
                self.shared.mark_finished();
                return Err(e.into());
            }
        };

        *self.worker.lock() = Some(handle);

        info!(instance = %instance, "Channel started");
        Ok(())
    }

    /// Stop capturing.
    ///
    /// Sets the stop flag and waits up to the stop timeout for the capture
    /// thread to exit. From inside an observer this only sets the flag.
    /// Calling it on a channel that is not running has no effect.
    pub fn stop(&self) -> Result<()> {
        self.shared.request_stop();
        if self.on_capture_thread() {
            debug!(instance = %self.shared.instance, "Stop requested from capture thread");
            return Ok(());
        }

        let _lifecycle = self.lifecycle.lock();
        self.join_worker(Some(self.config.stop_timeout()))
    }

    /// Stop, delete the native channel, and release the driver session.
    ///
    /// Idempotent. Cannot be called from inside an observer.
    pub fn dispose(&self) -> Result<()> {
        if self.on_capture_thread() {
            return Err(GrabberError::CaptureThreadReentry {
                operation: "dispose",
            });
        }
        let _lifecycle = self.lifecycle.lock();

        if self.shared.state() == ChannelState::Disposed {
            return Ok(());
        }

        self.shared.request_stop();
        if let Err(e) = self.join_worker(Some(self.config.stop_timeout())) {
            warn!(error = %e, "Capture thread slow to exit, waiting without bound");
            self.join_worker(None)?;
        }

        let api = self.shared.api.as_ref();
        let instance = self.shared.instance;
        let status = api.delete(instance);
        if status != STATUS_OK {
            warn!(
                instance = %instance,
                code = status,
                message = %ErrorReporter::new(api).describe(status),
                "Failed to delete channel"
            );
        }
        self.shared.set_state(ChannelState::Disposed);
        self.shared.observers.lock().clear();

        let guard = self.session.lock().take();
        if let Some(guard) = guard {
            guard.release()?;
        }

        info!(instance = %instance, "Channel disposed");
        Ok(())
    }

    /// Register a frame observer. Observers run in registration order.
    pub fn add_observer<O>(&self, observer: O) -> Result<()>
    where
        O: FrameObserver + 'static,
    {
        if self.on_capture_thread() {
            return Err(GrabberError::CaptureThreadReentry {
                operation: "add_observer",
            });
        }
        if self.shared.state() == ChannelState::Disposed {
            return Err(GrabberError::Disposed);
        }
        self.shared.observers.lock().push(Box::new(observer));
        Ok(())
    }

    /// Subscribe to loop notifications (failures, end of activity, stop).
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Native channel handle.
    pub fn handle(&self) -> Handle {
        self.shared.instance
    }

    /// Whether the capture thread is running.
    pub fn is_running(&self) -> bool {
        !self.shared.is_finished()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ChannelStats {
        self.shared.stats.snapshot()
    }

    /// Configuration the channel was opened with.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn on_capture_thread(&self) -> bool {
        self.shared.on_capture_thread()
    }

    /// Join the capture thread, waiting at most `bound` for it to finish.
    fn join_worker(&self, bound: Option<Duration>) -> Result<()> {
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return Ok(());
        };

        if let Some(timeout) = bound {
            if !self.shared.wait_finished(timeout) {
                *worker = Some(handle);
                warn!(instance = %self.shared.instance, ?timeout, "Capture thread did not stop in time");
                return Err(GrabberError::StopTimeout(timeout));
            }
        }

        if handle.join().is_err() {
            error!(instance = %self.shared.instance, "Capture thread panicked");
        }

        let stats = self.stats();
        info!(
            instance = %self.shared.instance,
            frames = stats.frames_dispatched,
            failures = stats.acquisition_failures,
            "Channel stopped"
        );
        Ok(())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("handle", &self.handle())
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.on_capture_thread() {
            // Last owner went away inside an observer: the loop finishes the teardown
            if self.shared.state() != ChannelState::Disposed {
                debug!(instance = %self.shared.instance, "Channel dropped on capture thread");
                self.shared.retire(self.session.lock().take());
            }
            return;
        }
        if let Err(e) = self.dispose() {
            error!(instance = %self.shared.instance, error = %e, "Error disposing channel on drop");
        }
    }
}

fn release_after_failure(guard: SessionGuard) {
    if let Err(e) = guard.release() {
        warn!(error = %e, "Failed to release driver session after setup failure");
    }
}

fn set_int(api: &dyn GrabberApi, instance: Handle, param: Param<'_>, value: i32) -> Result<()> {
    let status = api.set_int(instance, param, value);
    ErrorReporter::new(api).configuration(status, format!("set {} = {}", param, value))
}

fn set_str(api: &dyn GrabberApi, instance: Handle, param: Param<'_>, value: &str) -> Result<()> {
    let status = api.set_str(instance, param, value);
    ErrorReporter::new(api).configuration(status, format!("set {} = '{}'", param, value))
}

/// Apply source selection, the fixed capture format, and signal delivery.
fn configure(api: &dyn GrabberApi, instance: Handle, config: &ChannelConfig) -> Result<()> {
    use grabber_sys::*;

    set_int(api, instance, Param::Id(PARAM_DRIVER_INDEX), config.source_index)?;
    set_str(api, instance, Param::Name(CONNECTOR_PARAM), &config.connector)?;
    set_str(api, instance, Param::Name(STANDARD_PARAM), &config.standard)?;

    set_int(api, instance, Param::Id(PARAM_COLOR_FORMAT), FG_COLOR_FORMAT_RGB24)?;
    set_int(api, instance, Param::Id(PARAM_ACQUISITION_MODE), FG_ACQUISITION_MODE_VIDEO)?;
    set_int(api, instance, Param::Id(PARAM_TRIG_MODE), FG_TRIG_MODE_IMMEDIATE)?;
    set_int(api, instance, Param::Id(PARAM_NEXT_TRIG_MODE), FG_NEXT_TRIG_MODE_REPEAT)?;
    set_int(api, instance, Param::Id(PARAM_SEQ_LENGTH_FR), FG_INDETERMINATE)?;

    for signal in SignalKind::ARMED {
        let raw = signal.to_raw();
        set_int(
            api,
            instance,
            Param::indexed(PARAM_SIGNAL_HANDLING, raw),
            FG_SIGNAL_HANDLING_WAITING,
        )?;
        set_int(api, instance, Param::indexed(PARAM_SIGNAL_ENABLE, raw), FG_SIGNAL_ENABLE_ON)?;
    }
    Ok(())
}

/// Move the native channel to Ready so start only has to activate it.
fn pre_arm(api: &dyn GrabberApi, instance: Handle) -> Result<()> {
    set_int(
        api,
        instance,
        Param::Id(grabber_sys::PARAM_CHANNEL_STATE),
        grabber_sys::FG_CHANNEL_STATE_READY,
    )
}
