//! # rockit
//!
//! Batch image conversion and PDF merging behind a small session API.
//!
//! A user uploads a batch of files, asks for one transform, and downloads the
//! results:
//!
//! * **convert**: every image in the batch is re-encoded to one target format
//!   (jpg, jpeg, png, bmp, tiff, gif). Items fail independently.
//! * **merge**: every PDF in the batch is concatenated, in upload order, into
//!   one document. Any unreadable input aborts the merge.
//!
//! ## Overview
//!
//! ```text
//! Event ──▶ Session::handle ──▶ EventResult
//!             │
//!             ├─ intake   data URI → bytes, format sniffing
//!             ├─ store    stage inputs (released on drop)
//!             ├─ recode   image → image      (per item)
//!             ├─ merge    PDFs  → one PDF    (all or nothing)
//!             └─ store    materialise artifacts
//! ```
//!
//! Each [`Session`] owns a private temporary directory, so concurrent
//! sessions never see each other's files.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rockit::{Event, RockitConfig, Session, TransformSpec, UploadedItem};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(RockitConfig::builder().jpeg_quality(85).build()?);
//!     let mut session = Session::new(config)?;
//!
//!     let bytes = std::fs::read("photo.png")?;
//!     session.handle(Event::Uploaded(vec![UploadedItem::new("photo.png", bytes)]));
//!     let result = session.handle(Event::TransformRequested(TransformSpec::Convert {
//!         target_format: "jpg".into(),
//!     }));
//!     println!("{}", result.status_message());
//!
//!     for name in result.artifact_names() {
//!         let download = session.fetch(name)?;
//!         std::fs::write(&download.file_name, &download.bytes)?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `rockit` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | JSON session API and download route (axum + tower-http) |
//! | `heif`   | off     | Decode HEIF/HEIC uploads via libheif (needs the system library) |
//!
//! Library-only users can drop both:
//! ```toml
//! rockit = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{RockitConfig, RockitConfigBuilder, DEFAULT_MERGE_NAME, DEFAULT_SESSION_TTL};
pub use error::{ItemError, RockitError};
pub use output::{EventOutcome, EventResult, ItemResult};
pub use pipeline::intake::{SourceFormat, UploadedItem};
pub use pipeline::recode::TargetFormat;
pub use progress::{NoopProgressCallback, ProgressCallback, TransformProgressCallback};
pub use session::{Download, Event, Session, SessionState, TransformSpec};
pub use store::{Artifact, PendingArtifact, ResourceStore};
