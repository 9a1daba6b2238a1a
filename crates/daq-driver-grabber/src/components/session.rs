//! Driver Session Management
//!
//! The vendor driver keeps process-wide state: `fg_open_driver()` and
//! `fg_close_driver()` affect every channel in the process. A [`DriverSession`]
//! reference-counts its users so the driver is opened by the first
//! [`DriverSession::acquire`] and closed when the last [`SessionGuard`] goes away.
//!
//! - When count goes 0 → 1: open the driver (rolled back if opening fails)
//! - When count goes 1 → 0: close the driver

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::GrabberApi;
use crate::error::{ErrorReporter, Result};

static PROCESS_SESSION: OnceCell<Arc<DriverSession>> = OnceCell::new();

/// Reference-counted owner of the native driver session.
pub struct DriverSession {
    api: Arc<dyn GrabberApi>,
    ref_count: AtomicU32,
    open: AtomicBool,
    /// Makes increment + open and decrement + close atomic as pairs.
    transition: Mutex<()>,
}

impl DriverSession {
    /// Create a session around a native API. The driver is not opened yet.
    pub fn new(api: Arc<dyn GrabberApi>) -> Arc<Self> {
        Arc::new(Self {
            api,
            ref_count: AtomicU32::new(0),
            open: AtomicBool::new(false),
            transition: Mutex::new(()),
        })
    }

    /// The process-wide session. The first caller supplies the native API.
    pub fn process<F>(api: F) -> Arc<Self>
    where
        F: FnOnce() -> Arc<dyn GrabberApi>,
    {
        Arc::clone(PROCESS_SESSION.get_or_init(|| Self::new(api())))
    }

    /// Native API this session drives.
    pub fn api(&self) -> &Arc<dyn GrabberApi> {
        &self.api
    }

    /// Number of outstanding acquisitions.
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::SeqCst)
    }

    /// Whether the native driver is currently open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Take a reference on the driver session, opening the driver if this is the first.
    pub fn acquire(self: &Arc<Self>) -> Result<SessionGuard> {
        let _guard = self.transition.lock();

        let prev_count = self.ref_count.fetch_add(1, Ordering::SeqCst);
        if prev_count == 0 {
            let status = self.api.open_driver();
            if let Err(e) = ErrorReporter::new(self.api.as_ref()).session(status, "open") {
                // Rollback ref count on failure
                self.ref_count.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
            self.open.store(true, Ordering::SeqCst);
            info!("Grabber driver opened (ref count: 1)");
        } else {
            debug!(
                "Grabber driver already open (ref count: {})",
                prev_count + 1
            );
        }

        Ok(SessionGuard {
            session: Arc::clone(self),
            released: false,
        })
    }

    fn release(&self) -> Result<()> {
        let _guard = self.transition.lock();

        let prev_count = self.ref_count.load(Ordering::SeqCst);
        match prev_count {
            0 => {
                error!("Grabber driver ref count underflow - acquire/release are unpaired");
                Ok(())
            }
            1 => {
                self.ref_count.fetch_sub(1, Ordering::SeqCst);
                self.open.store(false, Ordering::SeqCst);
                let status = self.api.close_driver();
                ErrorReporter::new(self.api.as_ref()).session(status, "close")?;
                info!("Grabber driver closed (last reference released)");
                Ok(())
            }
            n => {
                self.ref_count.fetch_sub(1, Ordering::SeqCst);
                debug!("Grabber driver still in use (ref count: {})", n - 1);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for DriverSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverSession")
            .field("ref_count", &self.ref_count())
            .field("open", &self.is_open())
            .finish()
    }
}

/// One acquired reference on a [`DriverSession`].
///
/// Dropping the guard releases the reference; [`SessionGuard::release`] does
/// the same but reports a failure to close the driver.
#[must_use = "dropping the guard releases the driver session"]
pub struct SessionGuard {
    session: Arc<DriverSession>,
    released: bool,
}

impl SessionGuard {
    /// Session this guard holds a reference on.
    pub fn session(&self) -> &Arc<DriverSession> {
        &self.session
    }

    /// Native API of the held session.
    pub fn api(&self) -> &Arc<dyn GrabberApi> {
        self.session.api()
    }

    /// Release the reference now.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.session.release()
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("session", &self.session)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.session.release() {
            warn!(error = %e, "Failed to release grabber driver session");
        }
    }
}
