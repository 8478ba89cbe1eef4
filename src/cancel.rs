//! Cancellation handles for scheduled work.
//!
//! Every scheduling call returns a [`CancelHandle`]. Cancellation is a
//! protocol, not an interruption: cancelling marks the scheduled item dead
//! so the owning engine skips it, and optionally fires a one-shot callback
//! so the engine can release what it allocated for the item.
//!
//! # Guarantees
//!
//! - `cancel` is idempotent; the callback runs at most once, on the first
//!   call.
//! - Cancelling after the action already ran is a no-op, never an error.
//! - Cancelling never blocks on an in-flight action.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type CancelCallback = Box<dyn FnOnce() + Send>;

struct Inner {
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<CancelCallback>>,
}

/// An idempotent token that stops a scheduled item from running.
///
/// Handles are cheap to clone; clones share the same cancellation state.
/// An engine observes the flag when it is about to run the item, so a
/// handle cancelled strictly before its item's due time guarantees the
/// action never runs.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl CancelHandle {
    /// Creates a fresh, uncancelled handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    /// Creates a handle that runs `callback` on the first `cancel` call.
    ///
    /// Engines use this to tear down resources they allocated for the item
    /// (a queue slot, a dedicated thread's stop flag). The callback never
    /// runs more than once and never runs if the handle is never cancelled.
    #[must_use]
    pub fn with_callback<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(Some(Box::new(callback))),
            }),
        }
    }

    /// Returns the inert handle an action hands back when it scheduled no
    /// follow-up work. Cancelling it has no observable effect.
    #[must_use]
    pub fn uncancellable() -> Self {
        Self::new()
    }

    /// Marks the item cancelled and fires the callback if this is the
    /// first call.
    ///
    /// Never blocks on an in-flight action; an item that already started
    /// executing runs to completion.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            let callback = self.inner.on_cancel.lock().take();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Returns true if `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
