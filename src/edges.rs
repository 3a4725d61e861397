//! Edge implementations.

use std::sync::Arc;

use async_trait::async_trait;
use glu_common::{Descriptor, PromotionResult, UpdateKind};

use crate::core::{Edge, Resource, TypedPhase, UpdatablePhase};
use crate::errors::Result;

pub const KIND_PROMOTION: &str = "promotion";

/// Copies the source phase's resource into the destination phase whenever
/// their digests differ.
pub struct PromotionEdge<R: Resource> {
    from: Arc<dyn TypedPhase<R>>,
    to: Arc<dyn UpdatablePhase<R>>,
}

impl<R: Resource> PromotionEdge<R> {
    pub fn new(from: Arc<dyn TypedPhase<R>>, to: Arc<dyn UpdatablePhase<R>>) -> Self {
        Self { from, to }
    }

    /// The source resource, or `None` when both phases already agree.
    async fn pending(&self) -> Result<Option<R>> {
        let from = self.from.get_resource().await?;
        let to = self.to.get_resource().await?;
        if from.digest()? == to.digest()? {
            return Ok(None);
        }
        Ok(Some(from))
    }
}

#[async_trait]
impl<R: Resource> Edge for PromotionEdge<R> {
    fn kind(&self) -> &str {
        KIND_PROMOTION
    }

    fn from(&self) -> Descriptor {
        self.from.descriptor()
    }

    fn to(&self) -> Descriptor {
        self.to.descriptor()
    }

    async fn perform(&self) -> Result<PromotionResult> {
        let from = self.from.descriptor();
        let to = self.to.descriptor();
        tracing::debug!(from = %from, to = %to, "edge perform started");

        let result = match self.pending().await {
            Ok(None) => {
                tracing::debug!(from = %from, to = %to, reason = "up_to_date", "skipping promotion");
                Ok(PromotionResult::skipped())
            }
            Ok(Some(resource)) => self.to.update(resource, UpdateKind::Promotion).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(r) => tracing::debug!(from = %from, to = %to, status = ?r.status, "edge perform finished"),
            Err(e) => tracing::debug!(from = %from, to = %to, error = %e, "edge perform failed"),
        }
        result
    }
}
