//! Push interface for per-task progress reporting.

/// Receives byte progress for one task.
///
/// Implementations must be cheap and thread-safe: `add` is called from every
/// concurrent segment of the task after each written chunk.
pub trait ProgressSink: Send + Sync {
    /// Called once the total size is known. Single-stream downloads of
    /// unknown length never call it.
    fn start(&self, _total: u64) {}

    /// Records `delta` newly written bytes.
    fn add(&self, delta: u64);

    /// Called once after the whole task downloaded successfully.
    fn finish(&self);
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::ProgressSink;

    /// Sink that records everything it is told.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) total: AtomicU64,
        pub(crate) added: AtomicU64,
        pub(crate) finished: AtomicBool,
    }

    impl ProgressSink for RecordingSink {
        fn start(&self, total: u64) {
            self.total.store(total, Ordering::SeqCst);
        }

        fn add(&self, delta: u64) {
            self.added.fetch_add(delta, Ordering::SeqCst);
        }

        fn finish(&self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }
}
