//! Session-scoped temporary storage for staged inputs and produced artifacts.
//!
//! Each [`ResourceStore`] owns one private directory (`rockit-XXXXXX`) with
//! an `inputs/` and an `artifacts/` subdirectory. Two sessions never share a
//! directory, so two users asking for `merged_output.pdf` at the same time
//! get two different files. The whole directory is removed when the store
//! is dropped.
//!
//! Inputs are staged through [`ResourceStore::stage_all`], which returns a
//! [`StagedInputs`] guard. Dropping the guard deletes every staged input
//! whatever happened in between (success, error return, or panic), so a
//! transform can use `?` freely without leaking uploads. Artifacts are kept
//! until they are explicitly discarded.
//!
//! Artifacts are written in two steps. [`ResourceStore::write_pending`]
//! puts the bytes under `pending/` and returns a [`PendingArtifact`] guard;
//! [`ResourceStore::publish`] renames it into `artifacts/` under its
//! resolved name. A transform writes every output before publishing any,
//! so a failed write never costs the session its previous artifacts.

use crate::config::RockitConfig;
use crate::error::RockitError;
use crate::pipeline::intake::{sanitize_file_name, split_extension, UploadedItem};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Reference to one staged input file.
#[derive(Debug, Clone)]
pub struct StagedHandle {
    /// Display name of the upload this came from.
    pub name: String,
    pub path: PathBuf,
}

/// Staged inputs of one transform; released on drop.
#[derive(Debug)]
pub struct StagedInputs {
    handles: Vec<StagedHandle>,
}

impl StagedInputs {
    pub fn handles(&self) -> &[StagedHandle] {
        &self.handles
    }

    /// Read back the staged bytes of every input, in staging order.
    pub fn read_all(&self) -> Result<Vec<(String, Vec<u8>)>, RockitError> {
        self.handles
            .iter()
            .map(|h| {
                fs::read(&h.path)
                    .map(|bytes| (h.name.clone(), bytes))
                    .map_err(|e| RockitError::io(&h.path, e))
            })
            .collect()
    }
}

impl Drop for StagedInputs {
    fn drop(&mut self) {
        release_inputs(&self.handles);
    }
}

/// Best-effort deletion of staged inputs.
///
/// Failures are logged and swallowed: cleanup must never replace the
/// transform's own outcome.
pub fn release_inputs(handles: &[StagedHandle]) {
    for h in handles {
        match fs::remove_file(&h.path) {
            Ok(()) => debug!("Released staged input {}", h.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged input {}: {}", h.path.display(), e),
        }
    }
}

/// Bytes written to `pending/` but not yet published; removed on drop.
#[derive(Debug)]
pub struct PendingArtifact {
    path: PathBuf,
    size: u64,
}

impl Drop for PendingArtifact {
    fn drop(&mut self) {
        // After a publish the file has been renamed away.
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Dropped pending artifact {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove pending artifact {}: {}", self.path.display(), e),
        }
    }
}

/// A produced, retrievable file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Artifact {
    pub name: String,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// Per-session temporary storage.
#[derive(Debug)]
pub struct ResourceStore {
    dir: TempDir,
    inputs_dir: PathBuf,
    pending_dir: PathBuf,
    artifacts_dir: PathBuf,
    artifacts: BTreeMap<String, Artifact>,
    staged_count: u64,
    pending_count: u64,
}

impl ResourceStore {
    /// Create a fresh, private storage area.
    pub fn new(config: &RockitConfig) -> Result<Self, RockitError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("rockit-");
        let dir = match config.temp_root {
            Some(ref root) => {
                fs::create_dir_all(root).map_err(|e| RockitError::io(root, e))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| {
            RockitError::io(
                config.temp_root.clone().unwrap_or_else(std::env::temp_dir),
                e,
            )
        })?;

        let inputs_dir = dir.path().join("inputs");
        let pending_dir = dir.path().join("pending");
        let artifacts_dir = dir.path().join("artifacts");
        for d in [&inputs_dir, &pending_dir, &artifacts_dir] {
            fs::create_dir(d).map_err(|e| RockitError::io(d, e))?;
        }
        debug!("Created session store at {}", dir.path().display());

        Ok(Self {
            dir,
            inputs_dir,
            pending_dir,
            artifacts_dir,
            artifacts: BTreeMap::new(),
            staged_count: 0,
            pending_count: 0,
        })
    }

    /// Root of this session's storage area.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Persist one upload under a unique name in `inputs/`.
    pub fn stage(&mut self, item: &UploadedItem) -> Result<StagedHandle, RockitError> {
        self.staged_count += 1;
        let file_name = format!(
            "{:04}-{}",
            self.staged_count,
            sanitize_file_name(&item.name)
        );
        let path = self.inputs_dir.join(file_name);
        fs::write(&path, &item.bytes).map_err(|e| RockitError::io(&path, e))?;
        debug!("Staged {} → {}", item.name, path.display());
        Ok(StagedHandle {
            name: item.name.clone(),
            path,
        })
    }

    /// Stage every item in order, releasing what was staged if one fails.
    pub fn stage_all(&mut self, items: &[UploadedItem]) -> Result<StagedInputs, RockitError> {
        let mut staged = StagedInputs {
            handles: Vec::with_capacity(items.len()),
        };
        for item in items {
            // On error `staged` drops here and cleans up the partial set.
            staged.handles.push(self.stage(item)?);
        }
        Ok(staged)
    }

    /// Write and publish an artifact in one go.
    pub fn materialize(
        &mut self,
        bytes: &[u8],
        requested: &str,
        extension: &str,
        default: &str,
    ) -> Result<Artifact, RockitError> {
        let pending = self.write_pending(bytes)?;
        self.publish(pending, requested, extension, default, &[])
    }

    /// Write artifact bytes to `pending/`. Nothing becomes fetchable yet.
    pub fn write_pending(&mut self, bytes: &[u8]) -> Result<PendingArtifact, RockitError> {
        self.pending_count += 1;
        let path = self.pending_dir.join(format!("{:04}.part", self.pending_count));
        fs::write(&path, bytes).map_err(|e| RockitError::io(&path, e))?;
        Ok(PendingArtifact {
            path,
            size: bytes.len() as u64,
        })
    }

    /// Move a pending artifact into `artifacts/`, resolving its name.
    ///
    /// An empty (or unusable) `requested` name falls back to `default`.
    /// Otherwise the sanitised request is used with `extension` enforced:
    /// appended when missing, never doubled. A name already taken in this
    /// session gets a numeric suffix (`report-2.pdf`) unless it is listed in
    /// `replaceable`, in which case the old file is overwritten.
    pub fn publish(
        &mut self,
        pending: PendingArtifact,
        requested: &str,
        extension: &str,
        default: &str,
        replaceable: &[String],
    ) -> Result<Artifact, RockitError> {
        let base = resolve_artifact_name(requested, extension, default);
        let name = self.unique_name(&base, replaceable);
        let path = self.artifacts_dir.join(&name);
        fs::rename(&pending.path, &path).map_err(|e| RockitError::io(&path, e))?;

        let created_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let artifact = Artifact {
            name: name.clone(),
            size: pending.size,
            created_at,
        };
        self.artifacts.insert(name, artifact.clone());
        debug!("Materialised {} ({} bytes)", artifact.name, artifact.size);
        Ok(artifact)
    }

    /// Read an artifact's bytes. Only registered names resolve.
    pub fn fetch(&self, name: &str) -> Result<Vec<u8>, RockitError> {
        if !self.artifacts.contains_key(name) {
            return Err(RockitError::NotFound {
                name: name.to_string(),
            });
        }
        let path = self.artifacts_dir.join(name);
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RockitError::NotFound {
                name: name.to_string(),
            },
            _ => RockitError::io(&path, e),
        })
    }

    /// Forget an artifact and delete its file (best effort).
    pub fn discard(&mut self, name: &str) {
        if self.artifacts.remove(name).is_none() {
            return;
        }
        let path = self.artifacts_dir.join(name);
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove artifact {}: {}", path.display(), e);
        }
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    /// Files currently sitting in `inputs/`.
    pub fn staged_input_count(&self) -> usize {
        fs::read_dir(&self.inputs_dir)
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0)
    }

    /// Files currently sitting in `pending/`.
    pub fn pending_count(&self) -> usize {
        fs::read_dir(&self.pending_dir)
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0)
    }

    fn unique_name(&self, base: &str, replaceable: &[String]) -> String {
        let free = |candidate: &str| {
            replaceable.iter().any(|r| r == candidate)
                || (!self.artifacts.contains_key(candidate)
                    && !self.artifacts_dir.join(candidate).exists())
        };
        if free(base) {
            return base.to_string();
        }
        let (stem, ext) = split_extension(base);
        (2u32..)
            .map(|n| match ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            })
            .find(|candidate| free(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

/// Apply the naming rule without touching the filesystem.
pub fn resolve_artifact_name(requested: &str, extension: &str, default: &str) -> String {
    let requested = requested.trim();
    let base = if requested.is_empty() {
        sanitize_file_name(default)
    } else {
        sanitize_file_name(requested)
    };
    let (_, current_ext) = split_extension(&base);
    match current_ext {
        Some(ext) if ext.eq_ignore_ascii_case(extension) => base,
        _ => format!("{base}.{extension}"),
    }
}
