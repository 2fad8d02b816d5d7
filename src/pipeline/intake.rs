//! Upload intake: turn what the transport hands us into an [`UploadedItem`].
//!
//! Browser uploads arrive as `(filename, "mime;base64,payload")` pairs. We
//! keep only the decoded bytes and the original filename, and infer the real
//! format from the content's magic bytes rather than the extension. The
//! filename is display text only; before it touches the filesystem it goes
//! through [`sanitize_file_name`].

use crate::error::RockitError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::debug;

/// Longest sanitised filename we will put on disk, in bytes.
const MAX_FILE_NAME_LEN: usize = 128;

/// Format detected from the leading bytes of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Image(ImageFormat),
    /// HEIF/HEIC container (phone camera photos). Decodable with the `heif`
    /// feature.
    Heif,
    Unknown,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Pdf => f.write_str("pdf"),
            SourceFormat::Image(fmt) => {
                let ext = fmt.extensions_str().first().copied().unwrap_or("image");
                f.write_str(ext)
            }
            SourceFormat::Heif => f.write_str("heic"),
            SourceFormat::Unknown => f.write_str("unknown"),
        }
    }
}

/// One uploaded file as held by a session's batch.
#[derive(Clone)]
pub struct UploadedItem {
    /// Original, user-supplied name. Never trusted as a path.
    pub name: String,
    pub bytes: Vec<u8>,
    pub source_format: SourceFormat,
}

impl fmt::Debug for UploadedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedItem")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .field("source_format", &self.source_format)
            .finish()
    }
}

impl UploadedItem {
    /// Wrap raw bytes, inferring the source format from content.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let source_format = infer_source_format(&bytes);
        Self {
            name: name.into(),
            bytes,
            source_format,
        }
    }

    /// Decode a browser data-URI (`data:image/png;base64,iVBOR…`).
    pub fn from_data_uri(name: impl Into<String>, contents: &str) -> Result<Self, RockitError> {
        let name = name.into();
        let bytes = decode_data_uri(contents).map_err(|detail| RockitError::Decode {
            name: name.clone(),
            detail,
        })?;
        debug!("Decoded upload '{}' → {} bytes", name, bytes.len());
        Ok(Self::new(name, bytes))
    }
}

/// Guess the container from magic bytes.
pub fn infer_source_format(bytes: &[u8]) -> SourceFormat {
    if bytes.starts_with(b"%PDF") {
        return SourceFormat::Pdf;
    }
    if is_heif(bytes) {
        return SourceFormat::Heif;
    }
    match image::guess_format(bytes) {
        Ok(fmt) => SourceFormat::Image(fmt),
        Err(_) => SourceFormat::Unknown,
    }
}

/// ISO-BMFF `ftyp` box with a HEIF image brand.
pub fn is_heif(bytes: &[u8]) -> bool {
    const BRANDS: [&[u8; 4]; 8] = [
        b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
    ];
    bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && BRANDS.iter().any(|b| &bytes[8..12] == *b)
}

/// Split a `header,payload` data-URI and base64-decode the payload.
///
/// Only the first comma separates header from payload; the header itself
/// is ignored since we sniff the format from content anyway.
pub fn decode_data_uri(contents: &str) -> Result<Vec<u8>, String> {
    let (_header, payload) = contents
        .split_once(',')
        .ok_or_else(|| "upload is not a data URI (missing ',' separator)".to_string())?;
    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| format!("invalid base64 payload: {e}"))
}

static RE_UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._\- ]").unwrap());

/// Reduce a user-supplied filename to something safe to join onto a directory.
///
/// Drops any directory components (both `/` and `\`), replaces anything
/// outside `[A-Za-z0-9._- ]` with `_`, strips leading dots/spaces so the
/// result can't be `..` or hidden, and caps the length. Returns `"file"`
/// when nothing usable is left.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    let mut cleaned = RE_UNSAFE_CHARS.replace_all(last, "_").into_owned();
    cleaned = cleaned.trim_start_matches(['.', ' ']).to_string();
    if cleaned.len() > MAX_FILE_NAME_LEN {
        // Only ASCII survives the regex, so any byte index is a char boundary.
        cleaned.truncate(MAX_FILE_NAME_LEN);
    }
    // Trim the end after truncating so the cut never leaves a dot or space.
    let trimmed = cleaned.trim_end_matches([' ', '.']);
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Split `name` into stem and extension at the last dot.
///
/// A leading dot does not start an extension (`.profile` has none), which
/// matches how most tools treat hidden files.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}
