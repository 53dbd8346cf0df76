//! Progress-callback trait for batch extraction events.
//!
//! Pass an [`Arc<dyn BatchProgressCallback>`] to
//! [`crate::BatchTracker::with_progress_callback`] to receive events as each
//! file of a batch is processed. Callers can forward events to a channel, a
//! database record or a terminal progress bar; the library knows nothing
//! about how the host application reports progress.
//!
//! # Example
//!
//! ```rust
//! use ledgerdoc::BatchProgressCallback;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, _batch_id: &str, index: usize, total: usize, filename: &str) {
//!         let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{filename} ({}/{total}) done, {done} finished", index + 1);
//!     }
//! }
//!
//! let cb: Arc<dyn BatchProgressCallback> = Arc::new(CountingCallback {
//!     finished: AtomicUsize::new(0),
//! });
//! cb.on_batch_start("batch-1", 3);
//! ```

use std::sync::Arc;

/// Called by the batch tracker as it processes each file.
///
/// All methods have no-op defaults. With `concurrency > 1` the per-file
/// methods may be called concurrently from different tasks.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any file is processed.
    fn on_batch_start(&self, batch_id: &str, total_files: usize) {
        let _ = (batch_id, total_files);
    }

    /// A file moved to `processing`. `index` is 0-based.
    fn on_file_start(&self, batch_id: &str, index: usize, total_files: usize, filename: &str) {
        let _ = (batch_id, index, total_files, filename);
    }

    /// A file reached `completed`.
    fn on_file_complete(&self, batch_id: &str, index: usize, total_files: usize, filename: &str) {
        let _ = (batch_id, index, total_files, filename);
    }

    /// A file reached `error`.
    fn on_file_error(
        &self,
        batch_id: &str,
        index: usize,
        total_files: usize,
        filename: &str,
        error: &str,
    ) {
        let _ = (batch_id, index, total_files, filename, error);
    }

    /// Called once when the job reaches a terminal state.
    ///
    /// * `completed` — files that extracted successfully
    /// * `failed`    — files recorded with an error
    fn on_batch_complete(&self, batch_id: &str, completed: usize, failed: usize) {
        let _ = (batch_id, completed, failed);
    }
}

/// Callback that ignores every event. Used when none is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Shared callback handle.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
