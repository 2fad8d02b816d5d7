//! Structured results handed back to the presentation layer.
//!
//! The controller never builds UI text while it works; it returns an
//! [`EventResult`]. [`EventResult::status_message`] is the single place that
//! turns an outcome into the human-readable line(s) a UI shows.

use crate::error::{ItemError, RockitError};
use crate::pipeline::recode::TargetFormat;
use crate::session::SessionState;
use serde::{Deserialize, Serialize};

/// Outcome of one item in a recode batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Original upload name.
    pub name: String,
    pub success: bool,
    /// Artifact name on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl ItemResult {
    pub fn converted(name: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: true,
            artifact: Some(artifact.into()),
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: ItemError) -> Self {
        Self {
            name: name.into(),
            success: false,
            artifact: None,
            error: Some(error),
        }
    }
}

/// What an event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventOutcome {
    /// Files were added to the batch.
    Staged { added: usize, total: usize },
    /// A recode finished with at least one success.
    Converted {
        target: TargetFormat,
        succeeded: usize,
        failed: usize,
    },
    /// A merge produced one document.
    Merged { documents: usize, page_count: usize },
    Reset,
    Failed { code: String, message: String },
}

/// Per-event result for the UI / transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResult {
    pub state: SessionState,
    pub outcome: EventOutcome,
    /// The single artifact of a merge. Recode artifacts are per item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemResult>,
}

impl EventResult {
    pub(crate) fn failed(error: &RockitError, items: Vec<ItemResult>) -> Self {
        Self {
            state: SessionState::Failed,
            outcome: EventOutcome::Failed {
                code: error.code().to_string(),
                message: error.to_string(),
            },
            artifact_name: None,
            items,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, EventOutcome::Failed { .. })
    }

    /// Names of every artifact this event produced.
    pub fn artifact_names(&self) -> Vec<&str> {
        self.artifact_name
            .iter()
            .map(String::as_str)
            .chain(self.items.iter().filter_map(|i| i.artifact.as_deref()))
            .collect()
    }

    /// Human-readable status text. Empty after a reset.
    pub fn status_message(&self) -> String {
        match &self.outcome {
            EventOutcome::Staged { added: 0, total } => {
                format!("No new files. {total} file(s) staged.")
            }
            EventOutcome::Staged { added, total } => {
                format!("Added {added} file(s). {total} file(s) staged.")
            }
            EventOutcome::Converted { target, .. } => {
                let upper = target.extension().to_ascii_uppercase();
                self.items
                    .iter()
                    .map(|item| match &item.error {
                        None => format!("Successfully converted {} to {}.", item.name, upper),
                        Some(e) => e.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            EventOutcome::Merged { .. } => "Merge successful!".to_string(),
            EventOutcome::Reset => String::new(),
            EventOutcome::Failed { message, .. } => {
                let mut lines = vec![message.clone()];
                lines.extend(
                    self.items
                        .iter()
                        .filter_map(|i| i.error.as_ref().map(ToString::to_string)),
                );
                lines.join("\n")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converted_message_lists_each_item() {
        let result = EventResult {
            state: SessionState::Ready,
            outcome: EventOutcome::Converted {
                target: TargetFormat::Png,
                succeeded: 1,
                failed: 1,
            },
            artifact_name: None,
            items: vec![
                ItemResult::converted("a.jpg", "a.png"),
                ItemResult::failed(
                    "b.jpg",
                    ItemError::Decode {
                        name: "b.jpg".into(),
                        detail: "bad huffman".into(),
                    },
                ),
            ],
        };
        assert_eq!(
            result.status_message(),
            "Successfully converted a.jpg to PNG.\nFailed to decode b.jpg: bad huffman"
        );
        assert_eq!(result.artifact_names(), vec!["a.png"]);
    }

    #[test]
    fn reset_message_is_empty() {
        let result = EventResult {
            state: SessionState::Idle,
            outcome: EventOutcome::Reset,
            artifact_name: None,
            items: vec![],
        };
        assert!(result.status_message().is_empty());
    }

    #[test]
    fn failed_result_carries_code() {
        let result = EventResult::failed(&RockitError::EmptyBatch, vec![]);
        assert!(result.is_failure());
        assert_eq!(result.state, SessionState::Failed);
        match &result.outcome {
            EventOutcome::Failed { code, .. } => assert_eq!(code, "EMPTY_BATCH"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(result.status_message().starts_with("No files uploaded"));
    }

    #[test]
    fn serialises_with_tagged_outcome() {
        let result = EventResult {
            state: SessionState::Ready,
            outcome: EventOutcome::Merged {
                documents: 2,
                page_count: 5,
            },
            artifact_name: Some("report.pdf".into()),
            items: vec![],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["outcome"]["type"], "merged");
        assert_eq!(json["artifact_name"], "report.pdf");
        assert!(json.get("items").is_none());
    }
}
