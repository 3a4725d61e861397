use std::collections::BTreeMap;
use std::sync::Arc;

use glu_common::Metadata;

use super::{Edge, Phase};
use crate::errors::{Error, Result};

/// Predicate over phases. An empty filter matches every phase.
#[derive(Clone, Default)]
pub struct PhaseFilter {
    phase: Option<Arc<dyn Phase>>,
    name: Option<String>,
    labels: BTreeMap<String, String>,
}

impl PhaseFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match only this exact phase instance.
    pub fn is_phase(mut self, phase: Arc<dyn Phase>) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn has_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn has_all_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn matches(&self, phase: &Arc<dyn Phase>) -> bool {
        if let Some(wanted) = &self.phase
            && !std::ptr::addr_eq(Arc::as_ptr(wanted), Arc::as_ptr(phase))
        {
            return false;
        }

        let descriptor = phase.descriptor();
        if let Some(name) = &self.name
            && name != descriptor.name()
        {
            return false;
        }

        descriptor.metadata.has_all_labels(&self.labels)
    }
}

impl std::fmt::Debug for PhaseFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseFilter")
            .field("phase", &self.phase.as_ref().map(|p| p.descriptor().to_string()))
            .field("name", &self.name)
            .field("labels", &self.labels)
            .finish()
    }
}

/// Named phases plus the edges between them.
///
/// Phases and edges are only ever added. Cycles are not detected.
pub struct Pipeline {
    metadata: Metadata,
    phases: BTreeMap<String, Arc<dyn Phase>>,
    // from -> to -> edges of distinct kinds
    edges: BTreeMap<String, BTreeMap<String, Vec<Arc<dyn Edge>>>>,
}

impl Pipeline {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            phases: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn add_phase(&mut self, phase: Arc<dyn Phase>) -> Result<()> {
        let descriptor = phase.descriptor();
        let name = descriptor.name().to_string();
        if self.phases.contains_key(&name) {
            return Err(Error::already_exists("phase", descriptor.to_string()));
        }
        tracing::debug!(pipeline = %self.metadata.name, phase = %name, kind = %descriptor.kind, "phase added");
        self.phases.insert(name, phase);
        Ok(())
    }

    pub fn phase_by_name(&self, name: &str) -> Result<Arc<dyn Phase>> {
        self.phases
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("phase", format!("{}/{name}", self.metadata.name)))
    }

    /// Phases matching `filter`, ordered by name.
    pub fn phases<'a>(&'a self, filter: PhaseFilter) -> impl Iterator<Item = Arc<dyn Phase>> + 'a {
        self.phases
            .values()
            .filter(move |phase| filter.matches(phase))
            .cloned()
    }

    /// Add an edge. A second edge of the same kind (case-insensitive)
    /// between the same two phases is rejected.
    pub fn add_edge(&mut self, edge: Arc<dyn Edge>) -> Result<()> {
        let from = edge.from().metadata.name;
        let to = edge.to().metadata.name;
        let existing = self
            .edges
            .entry(from.clone())
            .or_default()
            .entry(to.clone())
            .or_default();
        if existing
            .iter()
            .any(|e| e.kind().eq_ignore_ascii_case(edge.kind()))
        {
            return Err(Error::already_exists(
                "edge",
                format!("{} from {from} to {to}", edge.kind()),
            ));
        }
        existing.push(edge);
        Ok(())
    }

    /// Edges, optionally restricted to one kind (case-insensitive).
    pub fn edges<'a>(&'a self, kind: Option<&'a str>) -> impl Iterator<Item = Arc<dyn Edge>> + 'a {
        self.edges
            .values()
            .flat_map(|outgoing| outgoing.values())
            .flatten()
            .filter(move |edge| kind.is_none_or(|k| edge.kind().eq_ignore_ascii_case(k)))
            .cloned()
    }

    /// Edges leaving the named phase.
    pub fn edges_from<'a>(&'a self, phase: &str) -> impl Iterator<Item = Arc<dyn Edge>> + 'a {
        self.edges
            .get(phase)
            .into_iter()
            .flat_map(|outgoing| outgoing.values())
            .flatten()
            .cloned()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.metadata.name)
            .field("phases", &self.phases.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Resource;
    use async_trait::async_trait;
    use glu_common::{Descriptor, PromotionResult, State};

    struct StaticPhase(Descriptor);

    struct Empty;

    impl Resource for Empty {
        fn digest(&self) -> Result<String> {
            Ok(String::new())
        }
    }

    #[async_trait]
    impl Phase for StaticPhase {
        fn descriptor(&self) -> Descriptor {
            self.0.clone()
        }

        async fn get(&self) -> Result<Box<dyn Resource>> {
            Ok(Box::new(Empty))
        }

        async fn history(&self) -> Result<Vec<State>> {
            Ok(Vec::new())
        }
    }

    struct NamedEdge {
        kind: &'static str,
        from: Descriptor,
        to: Descriptor,
    }

    #[async_trait]
    impl Edge for NamedEdge {
        fn kind(&self) -> &str {
            self.kind
        }

        fn from(&self) -> Descriptor {
            self.from.clone()
        }

        fn to(&self) -> Descriptor {
            self.to.clone()
        }

        async fn perform(&self) -> Result<PromotionResult> {
            Ok(PromotionResult::skipped())
        }
    }

    fn phase(name: &str, labels: &[(&str, &str)]) -> Arc<dyn Phase> {
        let mut meta = Metadata::new(name);
        for (k, v) in labels {
            meta = meta.with_label(*k, *v);
        }
        Arc::new(StaticPhase(Descriptor::new("static", "checkout", meta)))
    }

    fn edge(kind: &'static str, from: &Arc<dyn Phase>, to: &Arc<dyn Phase>) -> Arc<dyn Edge> {
        Arc::new(NamedEdge {
            kind,
            from: from.descriptor(),
            to: to.descriptor(),
        })
    }

    #[test]
    fn test_duplicate_phase_is_rejected() {
        let mut pipeline = Pipeline::new(Metadata::new("checkout"));
        pipeline.add_phase(phase("staging", &[])).unwrap();
        let err = pipeline.add_phase(phase("staging", &[])).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_phase_by_name_missing_is_not_found() {
        let pipeline = Pipeline::new(Metadata::new("checkout"));
        assert!(matches!(pipeline.phase_by_name("nope"), Err(e) if e.is_not_found()));
    }

    #[test]
    fn test_phases_filter_by_identity_name_and_labels() {
        let mut pipeline = Pipeline::new(Metadata::new("checkout"));
        let staging = phase("staging", &[("env", "staging"), ("region", "eu")]);
        let production = phase("production", &[("env", "production"), ("region", "eu")]);
        pipeline.add_phase(staging.clone()).unwrap();
        pipeline.add_phase(production.clone()).unwrap();

        let names = |filter: PhaseFilter| -> Vec<String> {
            pipeline
                .phases(filter)
                .map(|p| p.descriptor().metadata.name)
                .collect()
        };

        assert_eq!(names(PhaseFilter::new()), ["production", "staging"]);
        assert_eq!(names(PhaseFilter::new().is_phase(staging.clone())), ["staging"]);
        assert_eq!(names(PhaseFilter::new().named("production")), ["production"]);
        assert_eq!(
            names(PhaseFilter::new().has_label("region", "eu")),
            ["production", "staging"]
        );
        assert_eq!(
            names(
                PhaseFilter::new()
                    .has_label("region", "eu")
                    .has_label("env", "staging")
            ),
            ["staging"]
        );
        assert!(names(PhaseFilter::new().has_label("env", "dev")).is_empty());
    }

    #[test]
    fn test_phases_sequence_is_restartable() {
        let mut pipeline = Pipeline::new(Metadata::new("checkout"));
        pipeline.add_phase(phase("a", &[])).unwrap();
        pipeline.add_phase(phase("b", &[])).unwrap();
        assert_eq!(pipeline.phases(PhaseFilter::new()).count(), 2);
        assert_eq!(pipeline.phases(PhaseFilter::new()).count(), 2);
    }

    #[test]
    fn test_edges_reject_duplicate_kind_and_filter_by_kind() {
        let mut pipeline = Pipeline::new(Metadata::new("checkout"));
        let staging = phase("staging", &[]);
        let production = phase("production", &[]);

        pipeline
            .add_edge(edge("promotion", &staging, &production))
            .unwrap();
        let err = pipeline
            .add_edge(edge("Promotion", &staging, &production))
            .unwrap_err();
        assert!(err.is_already_exists());

        pipeline
            .add_edge(edge("rollback", &production, &staging))
            .unwrap();

        assert_eq!(pipeline.edges(None).count(), 2);
        assert_eq!(pipeline.edges(Some("PROMOTION")).count(), 1);
        assert_eq!(pipeline.edges_from("production").count(), 1);
        assert_eq!(pipeline.edges_from("missing").count(), 0);
    }
}
