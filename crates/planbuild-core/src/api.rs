//! Collaborator contracts
//!
//! The coordinator owns no storage and no model client. Everything it
//! consumes from the outside goes through these traits, so the runtime can
//! be driven by in-memory fakes in tests.

use crate::error::{ComputeError, StoreError};
use crate::types::{BuildResult, PendingBuildsByPath, PlanKey, PlanStatus, Replacement};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Persistent store for plans, builds and results
#[async_trait::async_trait]
pub trait PlanStore: Send + Sync {
    /// Load all pending edits for a plan branch, grouped by path
    async fn load_pending_builds(&self, plan: &PlanKey) -> Result<PendingBuildsByPath, StoreError>;

    /// Transition the plan's lifecycle status
    async fn set_plan_status(
        &self,
        plan: &PlanKey,
        status: PlanStatus,
        detail: &str,
    ) -> Result<(), StoreError>;

    /// Persist the outcome of one build
    async fn persist_build_result(&self, result: &BuildResult) -> Result<(), StoreError>;
}

/// Request sent to the edit service for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRequest {
    /// File path
    pub path: String,
    /// Content the edit applies against
    pub baseline: String,
    /// Desired change
    pub description: String,
    /// Candidate full content proposed by the planner
    pub candidate: String,
}

/// One increment of a streamed edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditChunk {
    /// Fragment of the JSON-encoded result
    Delta(String),
    /// Fully decoded result
    Complete(Vec<Replacement>),
}

/// Streamed edit response
pub type EditStream = BoxStream<'static, Result<EditChunk, ComputeError>>;

/// External service that turns a baseline and a change description into
/// textual replacements
#[async_trait::async_trait]
pub trait EditService: Send + Sync {
    /// Start a streaming edit
    ///
    /// `cancel` is the plan's context; implementations must stop producing
    /// chunks once it fires.
    async fn start_streaming_edit(
        &self,
        cancel: CancellationToken,
        request: EditRequest,
    ) -> Result<EditStream, ComputeError>;
}
