//! Cooperative cancellation observed at action boundaries.
//!
//! `CancelFlag` wraps an `Arc<AtomicBool>` shared between the SIGINT handler
//! and the applier.  The applier polls it before each action; an action
//! already in progress always runs to completion, since
//! [`SystemExecutor`](crate::exec::SystemExecutor) starts every child in its
//! own process group and the terminal's SIGINT never reaches it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Exit status used when a run is interrupted.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// A cheaply-clonable cancellation request.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a flag in the "not cancelled" state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Route SIGINT to this flag.
    ///
    /// The first interrupt requests cancellation; a second one exits the
    /// process immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler is already installed.
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            if flag.is_cancelled() {
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
            tracing::warn!("interrupt received; stopping after the current action");
            flag.cancel();
        })
    }
}
