//! Cancellation module.
//!
//! This module contains the cooperative cancellation token shared by
//! every long-running operation. The token is checked between
//! mappings, between messages and between fetch batches; operations
//! never abort mid-command.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Clonable cancellation flag.
///
/// All clones share the same flag: cancelling one cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns an error if cancellation has been requested, so call
    /// sites can bail out with `?`.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
