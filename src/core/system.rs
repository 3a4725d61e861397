use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use super::Pipeline;
use crate::errors::{Error, Result};

/// Explicitly owned registry of pipelines.
#[derive(Debug, Default)]
pub struct System {
    pipelines: BTreeMap<String, Arc<Pipeline>>,
}

impl System {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> Result<&mut Self> {
        let name = pipeline.name().to_string();
        if self.pipelines.contains_key(&name) {
            return Err(Error::already_exists("pipeline", name));
        }
        self.pipelines.insert(name, Arc::new(pipeline));
        Ok(self)
    }

    pub fn pipeline(&self, name: &str) -> Result<Arc<Pipeline>> {
        self.pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("pipeline", name))
    }

    /// Pipelines ordered by name.
    pub fn pipelines(&self) -> impl Iterator<Item = (&str, &Arc<Pipeline>)> {
        self.pipelines.iter().map(|(name, p)| (name.as_str(), p))
    }

    /// Run every edge's triggers until `cancel` fires, then wait for them to
    /// wind down. Returns the first trigger failure.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let edges: Vec<_> = self
            .pipelines
            .values()
            .flat_map(|pipeline| pipeline.edges(None))
            .collect();

        tracing::info!(
            pipelines = self.pipelines.len(),
            edges = edges.len(),
            "starting system"
        );

        let results = join_all(edges.iter().map(|edge| edge.run_triggers(cancel.clone()))).await;
        cancel.cancelled().await;
        tracing::info!("system stopped");

        results.into_iter().collect()
    }
}
