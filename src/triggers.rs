//! Triggers drive an edge's `perform` automatically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use glu_common::{Descriptor, PromotionResult, PromotionStatus};
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

use crate::core::Edge;
use crate::errors::{Error, Result};

const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(60);

/// How long triggers get to wind down once cancelled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Runs against an edge until cancelled.
#[async_trait]
pub trait Trigger: Send + Sync {
    async fn run(&self, cancel: CancellationToken, edge: Arc<dyn Edge>);
}

/// Performs the edge on a fixed interval. No backoff or jitter.
#[derive(Debug, Clone)]
pub struct ScheduleTrigger {
    interval: Duration,
}

impl Default for ScheduleTrigger {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SCHEDULE_INTERVAL,
        }
    }
}

impl ScheduleTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl Trigger for ScheduleTrigger {
    async fn run(&self, cancel: CancellationToken, edge: Arc<dyn Edge>) {
        let from = edge.from().to_string();
        let to = edge.to().to_string();
        tracing::debug!(
            kind = %edge.kind(),
            from = %from,
            to = %to,
            interval_secs = self.interval.as_secs_f64(),
            "starting promotion schedule"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match edge.perform().await {
                        Ok(PromotionResult { status: PromotionStatus::Skipped, .. }) => {}
                        Ok(result) => tracing::info!(
                            kind = %edge.kind(),
                            from = %from,
                            to = %to,
                            status = ?result.status,
                            "triggered edge"
                        ),
                        Err(e) => tracing::error!(
                            kind = %edge.kind(),
                            from = %from,
                            to = %to,
                            error = %e,
                            "triggered edge"
                        ),
                    }
                }
            }
        }
    }
}

/// An edge decorated with triggers.
pub struct TriggerableEdge {
    edge: Arc<dyn Edge>,
    triggers: Vec<Arc<dyn Trigger>>,
}

impl TriggerableEdge {
    pub fn new(edge: Arc<dyn Edge>, triggers: Vec<Arc<dyn Trigger>>) -> Self {
        Self { edge, triggers }
    }
}

/// Attach `triggers` to `edge`. Without triggers the edge is returned as is.
pub fn with_triggers(edge: Arc<dyn Edge>, triggers: Vec<Arc<dyn Trigger>>) -> Arc<dyn Edge> {
    if triggers.is_empty() {
        return edge;
    }
    Arc::new(TriggerableEdge::new(edge, triggers))
}

#[async_trait]
impl Edge for TriggerableEdge {
    fn kind(&self) -> &str {
        self.edge.kind()
    }

    fn from(&self) -> Descriptor {
        self.edge.from()
    }

    fn to(&self) -> Descriptor {
        self.edge.to()
    }

    async fn perform(&self) -> Result<PromotionResult> {
        self.edge.perform().await
    }

    /// Runs every trigger concurrently and waits for all of them.
    async fn run_triggers(&self, cancel: CancellationToken) -> Result<()> {
        let all = join_all(
            self.triggers
                .iter()
                .map(|trigger| trigger.run(cancel.clone(), self.edge.clone())),
        );
        tokio::pin!(all);

        tokio::select! {
            _ = &mut all => {}
            _ = cancel.cancelled() => {
                if tokio::time::timeout(SHUTDOWN_GRACE, &mut all).await.is_err() {
                    return Err(Error::Other(anyhow::anyhow!(
                        "timed out waiting on shutdown of triggers"
                    )));
                }
            }
        }

        tracing::info!(
            kind = %self.kind(),
            from = %self.edge.from(),
            to = %self.edge.to(),
            "edge triggers finished"
        );
        Ok(())
    }
}
