//! Progress-callback trait for per-item transform events.
//!
//! Inject an [`Arc<dyn TransformProgressCallback>`] via
//! [`crate::config::RockitConfigBuilder::progress_callback`] to receive
//! events as the controller works through a batch. For a recode, an "item"
//! is one uploaded image; for a merge it is one input document.
//!
//! # Example
//!
//! ```rust
//! use rockit::{RockitConfig, TransformProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl TransformProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, index: usize, total: usize, name: &str, output_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} ({} bytes)", index + 1, total, name, output_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = RockitConfig::builder()
//!     .progress_callback(counter as Arc<dyn TransformProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the controller as it processes each item of a batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Indices are 0-based positions in upload order.
pub trait TransformProgressCallback: Send + Sync {
    /// Called once before the first item is touched.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    fn on_item_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when an item was transformed. `output_len` is the encoded size
    /// for a recode and the page count contributed for a merge.
    fn on_item_complete(&self, index: usize, total: usize, name: &str, output_len: usize) {
        let _ = (index, total, name, output_len);
    }

    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after every item has been attempted (or the merge aborted).
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TransformProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RockitConfig`].
pub type ProgressCallback = Arc<dyn TransformProgressCallback>;
