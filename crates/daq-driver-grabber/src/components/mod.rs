//! Driver components: session, signal decoding, dispatch, acquisition loop.

pub mod acquisition;
pub mod dispatch;
pub mod session;
pub mod signal;
