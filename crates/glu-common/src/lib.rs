//! Shared domain types for the glu promotion engine.
//!
//! These are plain data types with no I/O: the engine (`glu`) and anything
//! consuming its read interfaces (an API, a CLI, a UI) agree on them.
//!
//! - `Metadata` / `Descriptor`: identity of a phase within a pipeline
//! - `State`: one immutable entry of a phase's recorded history
//! - `UpdateKind`: why a phase is being written (update, promotion, rollback)
//! - `PromotionResult`: what a promotion attempt did, plus annotations

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form key/value pairs attached to metadata, states and results.
pub type Annotations = BTreeMap<String, String>;

/// Well-known annotation keys written by the engine.
pub mod annotations {
    /// Branch a state or proposal is based on.
    pub const GIT_BASE_REF: &str = "dev.glu.git.base_ref";
    /// Commit hash the recorded state was read from or written to.
    pub const GIT_HEAD_SHA: &str = "dev.glu.git.head_sha";
    /// Browsable URL of the commit (only for recognised hosts).
    pub const GIT_COMMIT_URL: &str = "dev.glu.git.commit.url";
    /// URL of the review request carrying a pending promotion.
    pub const GIT_PROPOSAL_URL: &str = "dev.glu.git.proposal.url";
    /// Registry reference a registry-backed phase resolves.
    pub const OCI_IMAGE_URL: &str = "dev.glu.oci.image.url";
}

/// Identifies a named phase instance within a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl Metadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Subset match: every requested label must be present with an equal value.
    /// An empty request always matches.
    pub fn has_all_labels(&self, wanted: &BTreeMap<String, String>) -> bool {
        wanted
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|found| found == v))
    }
}

/// Global identity of a phase: its kind, owning pipeline and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub kind: String,
    pub pipeline: String,
    pub metadata: Metadata,
}

impl Descriptor {
    pub fn new(kind: impl Into<String>, pipeline: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            kind: kind.into(),
            pipeline: pipeline.into(),
            metadata,
        }
    }

    /// Phase name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pipeline, self.metadata.name)
    }
}

/// One immutable entry in a phase's history.
///
/// `R` defaults to `serde_json::Value` for consumers that only display
/// resources and do not know their concrete type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State<R = serde_json::Value> {
    /// Time-ordered version identifier (UUIDv7).
    pub version: Uuid,
    pub digest: String,
    pub resource: R,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
    pub recorded_at: DateTime<Utc>,
}

impl<R> State<R> {
    /// Convert the carried resource, keeping every other field.
    pub fn map<T>(self, f: impl FnOnce(R) -> T) -> State<T> {
        State {
            version: self.version,
            digest: self.digest,
            resource: f(self.resource),
            annotations: self.annotations,
            recorded_at: self.recorded_at,
        }
    }
}

/// Why a phase is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    #[default]
    Update,
    Promotion,
    Rollback,
}

impl UpdateKind {
    /// Imperative verb used in generated messages.
    pub fn verb(&self) -> &'static str {
        match self {
            UpdateKind::Update => "update",
            UpdateKind::Promotion => "promote",
            UpdateKind::Rollback => "rollback",
        }
    }

    /// Default commit message / proposal title, e.g. `Promote staging`.
    pub fn default_message(&self, phase: &Descriptor) -> String {
        let verb = self.verb();
        let mut chars = verb.chars();
        let titled: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        format!("{} {}", titled, phase.metadata.name)
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateKind::Update => write!(f, "update"),
            UpdateKind::Promotion => write!(f, "promotion"),
            UpdateKind::Rollback => write!(f, "rollback"),
        }
    }
}

/// Outcome of a promotion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    /// The destination branch was written directly.
    Updated,
    /// A review request carries the change (created, refreshed or reused).
    Proposed,
    /// The write produced no content change.
    NoChange,
    /// Source and destination were already in sync; nothing was attempted.
    Skipped,
}

/// Result of performing an edge or updating a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionResult {
    pub status: PromotionStatus,
    #[serde(default)]
    pub annotations: Annotations,
}

impl PromotionResult {
    pub fn updated(annotations: Annotations) -> Self {
        Self {
            status: PromotionStatus::Updated,
            annotations,
        }
    }

    pub fn proposed(annotations: Annotations) -> Self {
        Self {
            status: PromotionStatus::Proposed,
            annotations,
        }
    }

    pub fn no_change(annotations: Annotations) -> Self {
        Self {
            status: PromotionStatus::NoChange,
            annotations,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: PromotionStatus::Skipped,
            annotations: Annotations::new(),
        }
    }

    /// Whether anything was written or proposed.
    pub fn is_change(&self) -> bool {
        matches!(
            self.status,
            PromotionStatus::Updated | PromotionStatus::Proposed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging() -> Descriptor {
        Descriptor::new(
            "git",
            "checkout",
            Metadata::new("staging").with_label("env", "staging"),
        )
    }

    #[test]
    fn test_descriptor_display_is_pipeline_slash_name() {
        assert_eq!(staging().to_string(), "checkout/staging");
        assert_eq!(staging().name(), "staging");
    }

    #[test]
    fn test_label_match_is_subset_match() {
        let meta = Metadata::new("production")
            .with_label("env", "prod")
            .with_label("region", "eu");

        let mut wanted = BTreeMap::new();
        assert!(meta.has_all_labels(&wanted), "empty request matches");

        wanted.insert("env".to_string(), "prod".to_string());
        assert!(meta.has_all_labels(&wanted));

        wanted.insert("region".to_string(), "us".to_string());
        assert!(!meta.has_all_labels(&wanted), "value must be equal");

        wanted.clear();
        wanted.insert("tier".to_string(), "gold".to_string());
        assert!(!meta.has_all_labels(&wanted), "key must be present");
    }

    #[test]
    fn test_default_message_capitalises_verb() {
        assert_eq!(
            UpdateKind::Promotion.default_message(&staging()),
            "Promote staging"
        );
        assert_eq!(
            UpdateKind::Rollback.default_message(&staging()),
            "Rollback staging"
        );
        assert_eq!(UpdateKind::Update.to_string(), "update");
    }

    #[test]
    fn test_state_map_keeps_identity() {
        let state = State {
            version: Uuid::now_v7(),
            digest: "abc".to_string(),
            resource: 7u32,
            annotations: Annotations::new(),
            recorded_at: Utc::now(),
        };
        let version = state.version;
        let mapped = state.map(|n| n.to_string());
        assert_eq!(mapped.version, version);
        assert_eq!(mapped.resource, "7");
        assert_eq!(mapped.digest, "abc");
    }

    #[test]
    fn test_promotion_result_change_detection() {
        assert!(PromotionResult::updated(Annotations::new()).is_change());
        assert!(PromotionResult::proposed(Annotations::new()).is_change());
        assert!(!PromotionResult::no_change(Annotations::new()).is_change());
        assert!(!PromotionResult::skipped().is_change());
    }
}
