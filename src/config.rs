//! Configuration for a transform session.
//!
//! Every knob lives in [`RockitConfig`], built via [`RockitConfigBuilder`].
//! A session takes the config by `Arc` so the HTTP transport can share one
//! instance across all sessions it creates.

use crate::error::RockitError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default artifact name for a merge without an explicit output name.
pub const DEFAULT_MERGE_NAME: &str = "merged_output.pdf";

/// How long an untouched server session lives. Default: 30 minutes.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Configuration for a batch session.
///
/// # Example
/// ```rust
/// use rockit::RockitConfig;
///
/// let config = RockitConfig::builder()
///     .jpeg_quality(90)
///     .default_merge_name("combined.pdf")
///     .build()
///     .unwrap();
/// assert_eq!(config.jpeg_quality, 90);
/// ```
#[derive(Clone)]
pub struct RockitConfig {
    /// Parent directory for per-session temp directories.
    /// `None` uses the OS temp dir.
    pub temp_root: Option<PathBuf>,

    /// Artifact name used when a merge has no output name. Default: `merged_output.pdf`.
    pub default_merge_name: String,

    /// JPEG encoder quality, 1–100. Default: 75.
    pub jpeg_quality: u8,

    /// Idle time after which the HTTP transport evicts a session.
    pub session_ttl: Duration,

    /// Optional per-item progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RockitConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            default_merge_name: DEFAULT_MERGE_NAME.to_string(),
            jpeg_quality: 75,
            session_ttl: DEFAULT_SESSION_TTL,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RockitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RockitConfig")
            .field("temp_root", &self.temp_root)
            .field("default_merge_name", &self.default_merge_name)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("session_ttl", &self.session_ttl)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn TransformProgressCallback>"),
            )
            .finish()
    }
}

impl RockitConfig {
    /// Create a new builder for `RockitConfig`.
    pub fn builder() -> RockitConfigBuilder {
        RockitConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RockitConfig`].
pub struct RockitConfigBuilder {
    config: RockitConfig,
}

impl RockitConfigBuilder {
    pub fn temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_root = Some(dir.into());
        self
    }

    pub fn default_merge_name(mut self, name: impl Into<String>) -> Self {
        self.config.default_merge_name = name.into();
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RockitConfig, RockitError> {
        let c = &self.config;
        if !(1..=100).contains(&c.jpeg_quality) {
            return Err(RockitError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.default_merge_name.trim().is_empty() {
            return Err(RockitError::InvalidConfig(
                "Default merge name must not be empty".into(),
            ));
        }
        if c.session_ttl.is_zero() {
            return Err(RockitError::InvalidConfig(
                "Session TTL must be greater than zero".into(),
            ));
        }
        if let Some(ref root) = c.temp_root {
            if root.exists() && !root.is_dir() {
                return Err(RockitError::InvalidConfig(format!(
                    "Temp root '{}' is not a directory",
                    root.display()
                )));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = RockitConfig::default();
        assert_eq!(c.default_merge_name, "merged_output.pdf");
        assert_eq!(c.jpeg_quality, 75);
        assert_eq!(c.session_ttl, Duration::from_secs(1800));
        assert!(c.temp_root.is_none());
    }

    #[test]
    fn builder_rejects_zero_quality() {
        let err = RockitConfig::builder().jpeg_quality(0).build().unwrap_err();
        assert!(matches!(err, RockitError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_blank_merge_name() {
        let err = RockitConfig::builder()
            .default_merge_name("  ")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("merge name"));
    }

    #[test]
    fn builder_rejects_zero_ttl() {
        let err = RockitConfig::builder()
            .session_ttl(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("TTL"));
    }

    #[test]
    fn builder_rejects_file_as_temp_root() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = RockitConfig::builder()
            .temp_root(file.path())
            .build()
            .unwrap_err();
        assert!(matches!(err, RockitError::InvalidConfig(_)));
    }

    #[test]
    fn debug_hides_callback() {
        let c = RockitConfig::builder()
            .progress_callback(std::sync::Arc::new(crate::progress::NoopProgressCallback))
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("<dyn TransformProgressCallback>"));
    }
}
