//! Progress module.
//!
//! This module contains the interfaces the sync engine uses to report
//! progress to its driver. The engine treats them as opaque sinks:
//! implementations that discard everything are valid, and every method
//! has a no-op default so drivers only implement what they render.

/// Sink for the ongoing counts of a single operation, like scanning a
/// folder list or uploading the messages of one plan.
pub trait ProgressTracker: Send + Sync {
    fn update_message(&self, _message: &str) {}
    fn update_total(&self, _total: u64) {}
    fn increment(&self, _delta: u64) {}
    fn mark_done(&self) {}
    fn mark_errored(&self) {}
}

/// Factory and out-of-band log sink for a whole sync run.
pub trait Progress: Send + Sync {
    /// Writes a diagnostic line outside of any tracker.
    fn log(&self, _message: &str) {}

    /// Creates a tracker for one operation. Called once per scanning
    /// phase and once per plan during the execution phase.
    fn tracker(&self, _label: &str, _total: u64) -> Box<dyn ProgressTracker> {
        Box::new(SilentProgress)
    }
}

/// Progress implementation that discards everything.
pub struct SilentProgress;

impl Progress for SilentProgress {}

impl ProgressTracker for SilentProgress {}
