//! Capture runner.
//!
//! Opens every configured channel on one driver session, counts delivered
//! frames, logs channel events, and tears everything down when a stop
//! condition is met:
//! - Ctrl-C
//! - the requested duration elapsed
//! - the requested number of frames (across all channels) was delivered
//! - every channel's capture loop ended on its own

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use daq_driver_grabber::{
    Channel, ChannelConfig, ChannelEvent, ChannelStats, DriverSession, FrameDescriptor,
    GrabberApi, Handle,
};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::{BackendConfig, BackendKind};

/// How often [`Capture::run`] re-checks for capture loops that ended unseen.
const ENDED_RECHECK: Duration = Duration::from_millis(250);

/// Stop conditions for [`Capture::run`]. With neither set, runs until Ctrl-C.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
    /// Stop after this many frames in total
    pub frames: Option<u64>,
    /// Stop after this long
    pub duration: Option<Duration>,
}

/// Why a capture run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Ctrl-C
    Interrupted,
    /// Duration elapsed
    Duration,
    /// Frame target reached
    FrameTarget,
    /// Every capture loop ended by itself
    ChannelsEnded,
}

/// Per-channel result of a run.
#[derive(Debug, Clone)]
pub struct ChannelSummary {
    /// Native channel handle
    pub handle: Handle,
    /// Capture source index
    pub source_index: i32,
    /// Final counters
    pub stats: ChannelStats,
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    /// Stop condition that fired
    pub reason: StopReason,
    /// Frames delivered across all channels
    pub total_frames: u64,
    /// One entry per channel, in configuration order
    pub channels: Vec<ChannelSummary>,
}

/// Build the native layer selected in the configuration.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn GrabberApi>> {
    match config.kind {
        BackendKind::Mock => {
            let mock = daq_driver_grabber::MockGrabber::new();
            mock.start_stream(config.mock_frame_period, config.mock_pool_size);
            info!(
                period = ?config.mock_frame_period,
                pool = config.mock_pool_size,
                "Using mock grabber"
            );
            Ok(mock)
        }
        #[cfg(feature = "grabber_sdk")]
        BackendKind::Sdk => {
            let sdk = match &config.driver_name {
                Some(name) => daq_driver_grabber::SdkGrabber::with_driver_name(name)
                    .with_context(|| format!("Invalid driver name '{}'", name))?,
                None => daq_driver_grabber::SdkGrabber::new(),
            };
            info!(driver = ?config.driver_name, "Using vendor grabber library");
            Ok(sdk)
        }
        #[cfg(not(feature = "grabber_sdk"))]
        BackendKind::Sdk => bail!("SDK backend requested but built without the grabber_sdk feature"),
    }
}

/// Opened channels ready to run.
pub struct Capture {
    channels: Vec<Channel>,
    frames: Arc<AtomicU64>,
    target_reached: Arc<Notify>,
}

impl Capture {
    /// Open one channel per configuration entry.
    ///
    /// Channels opened before a failure are disposed when the error is returned.
    pub fn open(
        session: &Arc<DriverSession>,
        configs: &[ChannelConfig],
        options: CaptureOptions,
    ) -> Result<Self> {
        if configs.is_empty() {
            bail!("No channels configured");
        }

        let frames = Arc::new(AtomicU64::new(0));
        let target_reached = Arc::new(Notify::new());
        let mut channels = Vec::with_capacity(configs.len());

        for (index, config) in configs.iter().enumerate() {
            let channel = Channel::open(session, config.clone()).with_context(|| {
                format!(
                    "Failed to open channel #{} (source {}, {}/{})",
                    index, config.source_index, config.connector, config.standard
                )
            })?;

            let counter = Arc::clone(&frames);
            let notify = Arc::clone(&target_reached);
            let target = options.frames;
            channel.add_observer(move |frame: &FrameDescriptor<'_>| {
                let total = counter.fetch_add(1, Ordering::SeqCst) + 1;
                trace!(
                    channel = index,
                    sequence = frame.sequence(),
                    width = frame.width(),
                    height = frame.height(),
                    "Frame"
                );
                if target == Some(total) {
                    notify.notify_one();
                }
            })?;

            channels.push(channel);
        }

        Ok(Self {
            channels,
            frames,
            target_reached,
        })
    }

    /// Start every channel and run until a stop condition fires.
    pub async fn run(self, options: CaptureOptions) -> Result<CaptureSummary> {
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
        let mut loggers = Vec::with_capacity(self.channels.len());
        for (index, channel) in self.channels.iter().enumerate() {
            loggers.push(spawn_event_logger(
                index,
                channel.subscribe_events(),
                ended_tx.clone(),
            ));
        }
        drop(ended_tx);

        let started = self.channels.iter().try_for_each(|channel| channel.start());
        let reason = match started {
            Ok(()) => {
                info!(channels = self.channels.len(), "Capture running");
                let reason = tokio::select! {
                    _ = tokio::signal::ctrl_c() => StopReason::Interrupted,
                    _ = wait_for(options.duration) => StopReason::Duration,
                    _ = self.target_reached.notified(), if options.frames.is_some() => StopReason::FrameTarget,
                    _ = all_ended(&self.channels, &mut ended_rx) => StopReason::ChannelsEnded,
                };
                info!(?reason, "Stopping capture");
                Ok(reason)
            }
            Err(e) => {
                error!(error = %e, "Failed to start capture, shutting down");
                Err(e)
            }
        };

        let Self {
            channels, frames, ..
        } = self;
        let summaries = tokio::task::spawn_blocking(move || shutdown(channels))
            .await
            .context("Shutdown task failed")??;
        let reason = reason?;

        for logger in loggers {
            if let Err(e) = logger.await {
                warn!(error = %e, "Event logger task failed");
            }
        }

        Ok(CaptureSummary {
            reason,
            total_frames: frames.load(Ordering::SeqCst),
            channels: summaries,
        })
    }
}

fn shutdown(channels: Vec<Channel>) -> Result<Vec<ChannelSummary>> {
    for channel in &channels {
        if let Err(e) = channel.stop() {
            warn!(handle = %channel.handle(), error = %e, "Channel did not stop cleanly");
        }
    }

    let mut summaries = Vec::with_capacity(channels.len());
    for channel in channels {
        channel
            .dispose()
            .with_context(|| format!("Failed to dispose channel {}", channel.handle()))?;
        summaries.push(ChannelSummary {
            handle: channel.handle(),
            source_index: channel.config().source_index,
            stats: channel.stats(),
        });
    }
    Ok(summaries)
}

/// Resolves once every capture loop has exited.
///
/// `Stopped` events are the fast path; a lagged logger can miss them, so the
/// channels are also polled.
async fn all_ended(channels: &[Channel], ended: &mut mpsc::UnboundedReceiver<usize>) {
    let mut remaining = channels.len();
    let mut recheck = tokio::time::interval(ENDED_RECHECK);
    while remaining > 0 {
        tokio::select! {
            Some(_) = ended.recv() => remaining -= 1,
            _ = recheck.tick() => {
                if channels.iter().all(|channel| !channel.is_running()) {
                    return;
                }
            }
        }
    }
}

async fn wait_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

fn spawn_event_logger(
    index: usize,
    mut events: broadcast::Receiver<ChannelEvent>,
    ended: mpsc::UnboundedSender<usize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChannelEvent::Started) => debug!(channel = index, "Capture thread started"),
                Ok(ChannelEvent::AcquisitionFailure { count }) => {
                    warn!(channel = index, count, "Acquisition failure")
                }
                Ok(ChannelEvent::EndOfActivity) => info!(channel = index, "End of activity"),
                Ok(ChannelEvent::LoopFailed { message }) => {
                    error!(channel = index, %message, "Capture loop failed")
                }
                Ok(ChannelEvent::Stopped { frames }) => {
                    info!(channel = index, frames, "Capture thread stopped");
                    let _ = ended.send(index);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = index, skipped, "Event logger lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
