//! Request-scoped execution context
//!
//! A [`Context`] owns cleanup callbacks registered during a request and runs
//! them, most recent first, when it is closed or dropped. It also carries a
//! cancellation flag that long-running work checks between I/O steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

type Closer = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct Context {
    closers: Mutex<Vec<Closer>>,
    cancelled: AtomicBool,
    closed: AtomicBool,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `closer` when this context closes. Closing an already closed
    /// context runs it immediately.
    pub fn register_closer(&self, closer: impl FnOnce() + Send + 'static) {
        if self.is_closed() {
            closer();
            return;
        }
        self.closers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(closer));
    }

    pub fn num_closers(&self) -> usize {
        self.closers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Error::Cancelled` once the context has been cancelled.
    pub fn check_cancelled(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            return Err(crate::Error::Cancelled);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run every registered closer once. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let closers = std::mem::take(
            &mut *self
                .closers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for closer in closers.into_iter().rev() {
            closer();
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("closers", &self.num_closers())
            .field("cancelled", &self.is_cancelled())
            .field("closed", &self.is_closed())
            .finish()
    }
}
