//! Hooks the dispatcher uses to report how far a run has got.
//!
//! A run counts inputs, not requests: retries on the same input never move
//! the bar, and each input advances it exactly once when its outcome is
//! final. Terminal rendering lives in `usgeocoder_cli_utils`.

use std::sync::Arc;

/// Sink for run progress, shared by every worker of a run.
pub trait ProgressCallback: Send + Sync {
    /// Number of inputs the run will dispatch.
    fn set_total(&self, total: u64);

    fn inc(&self, delta: u64);

    fn set_message(&self, msg: String);

    fn finish(&self, msg: String);

    fn finish_and_clear(&self);
}

/// Discards every update. Used by library callers and tests.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
