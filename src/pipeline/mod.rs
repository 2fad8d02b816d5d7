//! Transform stages.
//!
//! Each submodule is a pure bytes-in / bytes-out step with no knowledge of
//! sessions or storage; the controller in [`crate::session`] wires them up.
//!
//! ```text
//! upload ──▶ intake ──▶ (store: stage) ──┬──▶ recode ──▶ (store: materialise)
//!           (data URI,                   │   (per item)
//!            sniffing)                   └──▶ merge
//!                                            (all-or-nothing)
//! ```
//!
//! 1. [`intake`]: decode data-URI uploads, sniff the container, sanitise names
//! 2. [`recode`]: decode one image and re-encode it in a [`recode::TargetFormat`]
//! 3. [`merge`]: concatenate PDFs page by page with lopdf

pub mod intake;
pub mod merge;
pub mod recode;
