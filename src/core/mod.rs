//! Phases, edges and the capability traits resources implement.
//!
//! A resource is any immutable value with a stable content digest. Phases
//! hold one environment's copy of a resource; edges connect two phases and
//! know how to move a resource between them.

mod pipeline;
mod system;

pub use pipeline::{PhaseFilter, Pipeline};
pub use system::System;

use async_trait::async_trait;
use glu_common::{Descriptor, PromotionResult, State, UpdateKind};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::Result;

/// A versioned payload with a deterministic content digest.
///
/// Identical logical state must produce the same digest; the digest is
/// otherwise opaque to the engine.
pub trait Resource: Send + Sync + 'static {
    fn digest(&self) -> Result<String>;

    /// Extra `(column, value)` pairs shown when inspecting a phase.
    fn printer_fields(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// A named node in a pipeline holding one environment's resource.
#[async_trait]
pub trait Phase: Send + Sync {
    fn descriptor(&self) -> Descriptor;

    /// Current resource, type-erased.
    async fn get(&self) -> Result<Box<dyn Resource>>;

    /// Recorded states, newest first. Phases without a log return nothing.
    async fn history(&self) -> Result<Vec<State>>;
}

/// A phase whose resource type is known.
#[async_trait]
pub trait TypedPhase<R: Resource>: Phase {
    async fn get_resource(&self) -> Result<R>;
}

/// A phase that can be written to.
#[async_trait]
pub trait UpdatablePhase<R: Resource>: TypedPhase<R> {
    async fn update(&self, to: R, kind: UpdateKind) -> Result<PromotionResult>;
}

/// A phase that can return to a previously recorded version.
#[async_trait]
pub trait RollbackPhase: Phase {
    async fn rollback(&self, version: Uuid) -> Result<PromotionResult>;
}

/// Directed relation between two phases.
#[async_trait]
pub trait Edge: Send + Sync {
    /// Identifies what `perform` does, e.g. `promotion`.
    fn kind(&self) -> &str;

    fn from(&self) -> Descriptor;

    fn to(&self) -> Descriptor;

    async fn perform(&self) -> Result<PromotionResult>;

    /// Drive any attached triggers until `cancel` fires. Edges without
    /// triggers return immediately.
    async fn run_triggers(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }
}
