//! Worker coordination for load and transform.
//!
//! Long running operations take a [`CancelToken`]; workers poll it between
//! layers and between tiles and bail out early once it fires. The
//! [`ParallelContext`] records the first error any worker hits and trips
//! the token so the remaining workers drain quickly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::Error;

/// A cheaply cloneable cancellation flag shared between the caller and the
/// worker pool.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, unfired token.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Fire the token. Every clone observes the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Shared state for one load or transform run.
pub(crate) struct ParallelContext {
    cancel: CancelToken,
    // The pool is aborted by the caller's token or by the first worker
    // error; this internal token covers both.
    abort: CancelToken,
    first_error: Mutex<Option<Error>>,
}

impl ParallelContext {
    pub(crate) fn new(cancel: CancelToken) -> ParallelContext {
        ParallelContext {
            cancel,
            abort: CancelToken::new(),
            first_error: Mutex::new(None),
        }
    }

    /// The token tile builders should poll: fires on caller cancellation
    /// and on the first recorded error.
    pub(crate) fn abort_token(&self) -> CancelToken {
        if self.cancel.is_cancelled() {
            self.abort.cancel();
        }
        self.abort.clone()
    }

    /// Whether workers should stop picking up new work.
    pub(crate) fn aborted(&self) -> bool {
        if self.cancel.is_cancelled() {
            self.abort.cancel();
        }
        self.abort.is_cancelled()
    }

    /// Record a worker error; the first one wins and aborts the pool.
    pub(crate) fn record_error(&self, error: Error) {
        let mut slot = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
        self.abort.cancel();
    }

    /// Resolve the run after all workers joined: caller cancellation wins
    /// over worker errors, success otherwise.
    pub(crate) fn finish(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut slot = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
        match slot.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn first_error_wins() {
        let ctx = ParallelContext::new(CancelToken::new());
        ctx.record_error(Error::MissingLayer(1));
        ctx.record_error(Error::MissingLayer(2));
        assert!(ctx.aborted());
        assert!(matches!(ctx.finish(), Err(Error::MissingLayer(1))));
    }

    #[test]
    fn cancellation_outranks_worker_errors() {
        let cancel = CancelToken::new();
        let ctx = ParallelContext::new(cancel.clone());
        ctx.record_error(Error::MissingLayer(1));
        cancel.cancel();
        assert!(matches!(ctx.finish(), Err(Error::Cancelled)));
    }

    #[test]
    fn abort_token_fires_on_caller_cancel() {
        let cancel = CancelToken::new();
        let ctx = ParallelContext::new(cancel.clone());
        let abort = ctx.abort_token();
        assert!(!abort.is_cancelled());
        cancel.cancel();
        assert!(ctx.aborted());
        assert!(abort.is_cancelled());
    }
}
