//! Progress-callback trait for per-page batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as a batch job walks its pages.
//!
//! Callbacks are the least-invasive integration point: the host can forward
//! events to a terminal bar, a log, or a dashboard record without the library
//! knowing how it communicates. The trait is `Send + Sync` because several
//! jobs may run at once, each calling into the same callback.

use crate::orchestrator::state::EngineMode;
use crate::output::EngineUsed;
use std::sync::Arc;

/// Called by the orchestrator as it processes each page of a batch job.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first page; `total_pages` includes pages that
    /// will be skipped because they are already checkpointed.
    fn on_batch_start(&self, job_id: &str, total_pages: usize) {
        let _ = (job_id, total_pages);
    }

    /// Called for a page found in the checkpoint; no engine is invoked.
    fn on_page_resumed(&self, job_id: &str, page: usize) {
        let _ = (job_id, page);
    }

    /// Called before the first engine call for a page.
    fn on_page_start(&self, job_id: &str, page: usize, mode: EngineMode) {
        let _ = (job_id, page, mode);
    }

    /// Called after the page result has been checkpointed.
    fn on_page_complete(&self, job_id: &str, page: usize, engine: EngineUsed, text_len: usize) {
        let _ = (job_id, page, engine, text_len);
    }

    /// Called when a page is recorded as permanently skipped.
    fn on_page_error(&self, job_id: &str, page: usize, error: &str) {
        let _ = (job_id, page, error);
    }

    /// Called whenever the engine state machine changes mode.
    fn on_mode_change(&self, job_id: &str, from: EngineMode, to: EngineMode) {
        let _ = (job_id, from, to);
    }

    /// Called once when the job stops, whether finished or cancelled.
    fn on_batch_complete(&self, job_id: &str, transcribed: usize, skipped: usize, cancelled: bool) {
        let _ = (job_id, transcribed, skipped, cancelled);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        resumed: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        mode_changes: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_page_resumed(&self, _job_id: &str, _page: usize) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _job_id: &str, _page: usize, _engine: EngineUsed, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _job_id: &str, _page: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_mode_change(&self, _job_id: &str, _from: EngineMode, _to: EngineMode) {
            self.mode_changes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start("job", 5);
        cb.on_page_resumed("job", 1);
        cb.on_page_start("job", 2, EngineMode::Normal);
        cb.on_page_complete("job", 2, EngineUsed::Primary, 42);
        cb.on_page_error("job", 3, "both engines failed");
        cb.on_mode_change("job", EngineMode::Normal, EngineMode::PermanentFallback);
        cb.on_batch_complete("job", 4, 1, false);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_resumed("job", 1);
        tracker.on_page_complete("job", 2, EngineUsed::Secondary, 100);
        tracker.on_page_complete("job", 3, EngineUsed::SecondaryRaw, 80);
        tracker.on_page_error("job", 4, "timeout");
        tracker.on_mode_change("job", EngineMode::Normal, EngineMode::Cooldown { remaining: 5 });

        assert_eq!(tracker.resumed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.mode_changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start("job", 10);
        cb.on_page_start("job", 1, EngineMode::Normal);
    }
}
