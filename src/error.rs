//! Error types for the rockit library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RockitError`]: **Fatal for the event**: the transform (or fetch)
//!   cannot produce its result at all (empty batch, unknown target format,
//!   a PDF in a merge that does not parse, temp storage not writable).
//!   The session moves to `Failed` and the error is reported once.
//!
//! * [`ItemError`]: **Non-fatal**: a single image in a recode batch could
//!   not be decoded or encoded, but the other items are fine. Stored inside
//!   [`crate::output::ItemResult`] so callers see partial success instead of
//!   losing the whole batch to one corrupt upload.
//!
//! Merging is all-or-nothing (one joint artifact), so it only ever reports
//! [`RockitError`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the rockit library.
///
/// Item-level failures use [`ItemError`] and are stored in
/// [`crate::output::ItemResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum RockitError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Uploaded bytes are not a readable document of the expected kind.
    #[error("Could not read '{name}': {detail}")]
    Decode { name: String, detail: String },

    /// Requested output format is outside the supported set.
    #[error("Unsupported output format '{format}'\nSupported: jpg, jpeg, png, bmp, tiff, gif.")]
    UnsupportedFormat { format: String },

    /// Transform requested with nothing staged.
    #[error("No files uploaded. Please upload files before transforming.")]
    EmptyBatch,

    /// Every item of a recode batch failed; there is nothing to download.
    #[error("All {total} files failed to convert.\nFirst error: {first_error}")]
    AllItemsFailed { total: usize, first_error: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Temporary storage could not be written or read.
    #[error("Temporary storage failure at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No artifact with this name exists in the session.
    #[error("No artifact named '{name}'")]
    NotFound { name: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RockitError {
    /// Stable machine-readable code, used by the HTTP transport.
    pub fn code(&self) -> &'static str {
        match self {
            RockitError::Decode { .. } => "DECODE_ERROR",
            RockitError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            RockitError::EmptyBatch => "EMPTY_BATCH",
            RockitError::AllItemsFailed { .. } => "ALL_ITEMS_FAILED",
            RockitError::Io { .. } => "IO_FAILURE",
            RockitError::NotFound { .. } => "NOT_FOUND",
            RockitError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RockitError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single item of a recode batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// Container was recognised but the image data is corrupt.
    #[error("Failed to decode {name}: {detail}")]
    Decode { name: String, detail: String },

    /// Bytes are not an image container we can read.
    #[error("Failed to convert {name}: unsupported or unrecognised image format")]
    UnsupportedFormat { name: String },

    /// Decoding worked but the target encoder rejected the image.
    #[error("Failed to encode {name}: {detail}")]
    Encode { name: String, detail: String },
}
