//! Caller-initiated cancellation
//!
//! A [`CancelToken`] is shared between the caller and one executing command.
//! Cancelling aborts the socket operation in flight, if any, and stops the
//! retry loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::network::AbortHandle;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    in_flight: Mutex<Option<AbortHandle>>,
}

/// Cancellation handle for a command
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.inner.in_flight.lock().as_ref() {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Publish the abort handle of the connection about to be used
    ///
    /// The handle is withdrawn when the returned guard drops. If the token was
    /// already cancelled the connection is aborted immediately.
    pub(crate) fn register(&self, handle: Option<AbortHandle>) -> InFlight<'_> {
        let mut slot = self.inner.in_flight.lock();
        if let Some(handle) = &handle {
            if self.is_cancelled() {
                handle.abort();
            }
        }
        *slot = handle;
        InFlight { token: self }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Clears the in-flight abort handle on drop
pub(crate) struct InFlight<'a> {
    token: &'a CancelToken,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.token.inner.in_flight.lock().take();
    }
}
