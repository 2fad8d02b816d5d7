//! The batch controller: one user's staged files, state and artifacts.
//!
//! A [`Session`] is an explicit context object. The transport feeds it
//! [`Event`]s and gets an [`EventResult`] back; there is no global state, so
//! any number of sessions can live side by side.
//!
//! ```text
//!            upload                 transform ok
//!   Idle ───────────▶ Staged ──┬──────────────────▶ Ready
//!    ▲                  ▲      │   (Transforming)
//!    │ reset (any)      │      └──────────────────▶ Failed
//!    └──────────────────┴── upload (from Ready/Failed)
//! ```
//!
//! `Transforming` only exists while [`Session::handle`] runs; every transform
//! resolves to `Ready` or `Failed` before `handle` returns. Staged inputs
//! are released and the batch is emptied after every transform attempt.
//! The previous artifacts are only superseded once the new ones are
//! published; a failed transform leaves them retrievable.

use crate::config::RockitConfig;
use crate::error::{ItemError, RockitError};
use crate::output::{EventOutcome, EventResult, ItemResult};
use crate::pipeline::intake::{sanitize_file_name, split_extension, UploadedItem};
use crate::pipeline::merge::{merge_pdfs, MergedPdf};
use crate::pipeline::recode::{recode_image, TargetFormat};
use crate::store::{Artifact, PendingArtifact, ResourceStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Staged,
    Transforming,
    Ready,
    Failed,
}

/// What the user asked the batch to become.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Re-encode every image to `target_format` (jpg, jpeg, png, bmp, tiff, gif).
    Convert { target_format: String },
    /// Concatenate every PDF into one document.
    Merge {
        #[serde(default)]
        output_name: Option<String>,
    },
}

/// External events a session reacts to.
#[derive(Debug, Clone)]
pub enum Event {
    Uploaded(Vec<UploadedItem>),
    TransformRequested(TransformSpec),
    ResetRequested,
}

/// An artifact ready to be sent to the client.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

enum Completed {
    Converted {
        target: TargetFormat,
        items: Vec<ItemResult>,
        artifacts: Vec<String>,
    },
    Merged {
        documents: usize,
        page_count: usize,
        artifact: Artifact,
    },
}

/// One user's batch session.
#[derive(Debug)]
pub struct Session {
    config: Arc<RockitConfig>,
    store: ResourceStore,
    state: SessionState,
    batch: Vec<UploadedItem>,
    /// Artifacts of the last successful transform.
    live: Vec<String>,
}

impl Session {
    /// Open a session with its own storage area.
    pub fn new(config: Arc<RockitConfig>) -> Result<Self, RockitError> {
        let store = ResourceStore::new(&config)?;
        Ok(Self {
            config,
            store,
            state: SessionState::Idle,
            batch: Vec::new(),
            live: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Staged items, in upload order.
    pub fn batch(&self) -> &[UploadedItem] {
        &self.batch
    }

    /// Artifacts produced by the last successful transform.
    pub fn artifacts(&self) -> Vec<&Artifact> {
        self.live
            .iter()
            .filter_map(|name| self.store.artifact(name))
            .collect()
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Apply one event and report what happened.
    pub fn handle(&mut self, event: Event) -> EventResult {
        match event {
            Event::Uploaded(items) => self.upload(items),
            Event::TransformRequested(spec) => self.transform(&spec),
            Event::ResetRequested => self.reset(),
        }
    }

    /// Retrieve a live artifact for download.
    pub fn fetch(&self, name: &str) -> Result<Download, RockitError> {
        let bytes = self.store.fetch(name)?;
        Ok(Download {
            file_name: name.to_string(),
            content_type: content_type_for(name),
            bytes,
        })
    }

    /// New uploads accumulate onto the batch in arrival order.
    fn upload(&mut self, items: Vec<UploadedItem>) -> EventResult {
        let added = items.len();
        if added > 0 {
            self.batch.extend(items);
            self.state = SessionState::Staged;
        }
        info!("Upload: +{} files, {} staged", added, self.batch.len());
        EventResult {
            state: self.state,
            outcome: EventOutcome::Staged {
                added,
                total: self.batch.len(),
            },
            artifact_name: None,
            items: Vec::new(),
        }
    }

    fn reset(&mut self) -> EventResult {
        self.batch.clear();
        self.discard_live();
        self.state = SessionState::Idle;
        info!("Session reset");
        EventResult {
            state: self.state,
            outcome: EventOutcome::Reset,
            artifact_name: None,
            items: Vec::new(),
        }
    }

    fn transform(&mut self, spec: &TransformSpec) -> EventResult {
        if self.batch.is_empty() {
            self.state = SessionState::Failed;
            warn!("Transform requested with no staged files");
            return EventResult::failed(&RockitError::EmptyBatch, Vec::new());
        }

        // The batch is consumed by this attempt whatever the outcome.
        let batch = std::mem::take(&mut self.batch);
        self.state = SessionState::Transforming;

        let result = match self.execute(&batch, spec) {
            Ok(Completed::Converted {
                target,
                items,
                artifacts,
            }) if !artifacts.is_empty() => {
                let failed = items.iter().filter(|i| !i.success).count();
                self.supersede(artifacts);
                EventResult {
                    state: SessionState::Ready,
                    outcome: EventOutcome::Converted {
                        target,
                        succeeded: items.len() - failed,
                        failed,
                    },
                    artifact_name: None,
                    items,
                }
            }
            Ok(Completed::Converted { items, .. }) => {
                let first_error = items
                    .iter()
                    .find_map(|i| i.error.as_ref())
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "Unknown error".to_string());
                let err = RockitError::AllItemsFailed {
                    total: items.len(),
                    first_error,
                };
                EventResult::failed(&err, items)
            }
            Ok(Completed::Merged {
                documents,
                page_count,
                artifact,
            }) => {
                self.supersede(vec![artifact.name.clone()]);
                EventResult {
                    state: SessionState::Ready,
                    outcome: EventOutcome::Merged {
                        documents,
                        page_count,
                    },
                    artifact_name: Some(artifact.name),
                    items: Vec::new(),
                }
            }
            Err(e) => {
                warn!("Transform failed: {}", e);
                EventResult::failed(&e, Vec::new())
            }
        };

        self.state = result.state;
        info!("Transform finished in state {:?}", self.state);
        result
    }

    /// Stage, run the strategy and materialise. Staged inputs are released
    /// when `staged` drops at the end of this function.
    fn execute(
        &mut self,
        batch: &[UploadedItem],
        spec: &TransformSpec,
    ) -> Result<Completed, RockitError> {
        match spec {
            TransformSpec::Convert { target_format } => {
                // Reject a bad target before anything is written.
                let target = target_format.parse::<TargetFormat>()?;
                // Output names keep the extension as the user spelled it.
                let extension = target_format.trim().trim_start_matches('.');
                let staged = self.store.stage_all(batch)?;
                let inputs = staged.read_all()?;
                self.convert(&inputs, target, extension)
            }
            TransformSpec::Merge { output_name } => {
                let staged = self.store.stage_all(batch)?;
                let inputs = staged.read_all()?;
                self.merge(&inputs, output_name.as_deref().unwrap_or(""))
            }
        }
    }

    fn convert(
        &mut self,
        inputs: &[(String, Vec<u8>)],
        target: TargetFormat,
        extension: &str,
    ) -> Result<Completed, RockitError> {
        let total = inputs.len();
        let progress = self.config.progress_callback.clone();
        if let Some(ref cb) = progress {
            cb.on_batch_start(total);
        }

        let mut written: Vec<(&str, Result<PendingArtifact, ItemError>)> =
            Vec::with_capacity(total);
        for (index, (name, bytes)) in inputs.iter().enumerate() {
            if let Some(ref cb) = progress {
                cb.on_item_start(index, total, name);
            }
            let result = recode_image(name, bytes, target, self.config.jpeg_quality);
            if let Some(ref cb) = progress {
                match &result {
                    Ok(out) => cb.on_item_complete(index, total, name, out.len()),
                    Err(e) => cb.on_item_error(index, total, name, &e.to_string()),
                }
            }
            let result = match result {
                // A storage failure aborts the whole batch.
                Ok(out) => Ok(self.store.write_pending(&out)?),
                Err(e) => {
                    warn!("{}", e);
                    Err(e)
                }
            };
            written.push((name.as_str(), result));
        }

        let mut replaceable = self.live.clone();
        let mut items = Vec::with_capacity(total);
        let mut artifacts = Vec::new();
        for (name, result) in written {
            let item = match result {
                Ok(pending) => {
                    let file_name = converted_file_name(name, extension);
                    match self
                        .store
                        .publish(pending, &file_name, extension, &file_name, &replaceable)
                    {
                        Ok(artifact) => {
                            replaceable.retain(|n| *n != artifact.name);
                            artifacts.push(artifact.name.clone());
                            ItemResult::converted(name, artifact.name)
                        }
                        Err(e) => {
                            self.withdraw(&artifacts);
                            return Err(e);
                        }
                    }
                }
                Err(e) => ItemResult::failed(name, e),
            };
            items.push(item);
        }

        if let Some(ref cb) = progress {
            cb.on_batch_complete(total, artifacts.len());
        }
        info!(
            "Converted {}/{} files to {}",
            artifacts.len(),
            total,
            target
        );
        Ok(Completed::Converted {
            target,
            items,
            artifacts,
        })
    }

    fn merge(
        &mut self,
        inputs: &[(String, Vec<u8>)],
        output_name: &str,
    ) -> Result<Completed, RockitError> {
        let refs: Vec<(&str, &[u8])> = inputs
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
            .collect();
        let MergedPdf { bytes, page_count } =
            merge_pdfs(&refs, self.config.progress_callback.as_ref())?;

        let pending = self.store.write_pending(&bytes)?;
        let default_name = self.config.default_merge_name.clone();
        let artifact =
            self.store
                .publish(pending, output_name, "pdf", &default_name, &self.live)?;
        info!("Merged artifact ready: {}", artifact.name);
        Ok(Completed::Merged {
            documents: inputs.len(),
            page_count,
            artifact,
        })
    }

    /// Make `fresh` the live artifacts, discarding old ones it did not reuse.
    fn supersede(&mut self, fresh: Vec<String>) {
        for name in std::mem::take(&mut self.live) {
            if !fresh.contains(&name) {
                self.store.discard(&name);
            }
        }
        self.live = fresh;
    }

    /// Roll back artifacts published by an aborted transform.
    fn withdraw(&mut self, published: &[String]) {
        for name in published {
            if !self.live.contains(name) {
                self.store.discard(name);
            }
        }
    }

    fn discard_live(&mut self) {
        for name in std::mem::take(&mut self.live) {
            self.store.discard(&name);
        }
    }
}

/// `<basename>.<extension>` for a recode output, basename taken from the
/// sanitised upload name.
fn converted_file_name(upload_name: &str, extension: &str) -> String {
    let safe = sanitize_file_name(upload_name);
    let (stem, _) = split_extension(&safe);
    format!("{stem}.{extension}")
}

fn content_type_for(name: &str) -> &'static str {
    match split_extension(name).1 {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => "application/pdf",
        Some(ext) => ext
            .parse::<TargetFormat>()
            .map(|t| t.mime_type())
            .unwrap_or("application/octet-stream"),
        None => "application/octet-stream",
    }
}
