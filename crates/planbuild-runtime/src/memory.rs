//! In-memory collaborators
//!
//! A [`PlanStore`] and an [`EditService`] that keep everything in process.
//! Used by the `planbuild` binary to replay scenarios and by tests.

use futures::StreamExt;
use parking_lot::Mutex;
use planbuild_core::{
    ActiveBuild, BuildResult, ComputeError, EditChunk, EditRequest, EditService, EditStream,
    PendingBuildsByPath, PlanKey, PlanStatus, PlanStore, Replacement, StoreError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Recorded status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Plan the status was set on
    pub plan: PlanKey,
    /// New status
    pub status: PlanStatus,
    /// Free-form detail
    pub detail: String,
}

/// In-memory plan store
///
/// Pending builds are handed out once: loading them removes them.
#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    pending: Mutex<HashMap<PlanKey, PendingBuildsByPath>>,
    statuses: Mutex<Vec<StatusChange>>,
    results: Mutex<Vec<BuildResult>>,
    load_error: Mutex<Option<StoreError>>,
    status_error: Mutex<Option<StoreError>>,
    persist_failures: AtomicUsize,
}

impl MemoryPlanStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pending build for `plan`
    pub fn add_pending(&self, plan: &PlanKey, build: ActiveBuild) {
        self.pending
            .lock()
            .entry(plan.clone())
            .or_default()
            .entry(build.path.clone())
            .or_default()
            .push(build);
    }

    /// Make every load fail with `error`
    pub fn fail_load(&self, error: StoreError) {
        *self.load_error.lock() = Some(error);
    }

    /// Make every status transition fail with `error`
    pub fn fail_status(&self, error: StoreError) {
        *self.status_error.lock() = Some(error);
    }

    /// Make the next `n` result writes fail
    pub fn fail_next_persists(&self, n: usize) {
        self.persist_failures.store(n, Ordering::SeqCst);
    }

    /// Status transitions so far
    #[must_use]
    pub fn statuses(&self) -> Vec<StatusChange> {
        self.statuses.lock().clone()
    }

    /// Persisted results, in write order
    #[must_use]
    pub fn results(&self) -> Vec<BuildResult> {
        self.results.lock().clone()
    }

    /// Persisted results for one path, in write order
    #[must_use]
    pub fn results_for(&self, path: &str) -> Vec<BuildResult> {
        self.results
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl PlanStore for MemoryPlanStore {
    async fn load_pending_builds(&self, plan: &PlanKey) -> Result<PendingBuildsByPath, StoreError> {
        if let Some(err) = self.load_error.lock().clone() {
            return Err(err);
        }
        Ok(self.pending.lock().remove(plan).unwrap_or_default())
    }

    async fn set_plan_status(
        &self,
        plan: &PlanKey,
        status: PlanStatus,
        detail: &str,
    ) -> Result<(), StoreError> {
        if let Some(err) = self.status_error.lock().clone() {
            return Err(err);
        }
        self.statuses.lock().push(StatusChange {
            plan: plan.clone(),
            status,
            detail: detail.to_owned(),
        });
        Ok(())
    }

    async fn persist_build_result(&self, result: &BuildResult) -> Result<(), StoreError> {
        let failing = self
            .persist_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("injected persist failure".into()));
        }
        self.results.lock().push(result.clone());
        Ok(())
    }
}

/// Edit service answering from a fixed table
///
/// Replacements are keyed by (path, description) and streamed back as JSON
/// deltas of `chunk_size` characters. Unscripted requests fail to start.
#[derive(Debug)]
pub struct StaticEditService {
    scripts: HashMap<(String, String), Vec<Replacement>>,
    chunk_size: usize,
    requests: Mutex<Vec<EditRequest>>,
    calls: AtomicUsize,
}

impl StaticEditService {
    /// Create service with no scripted edits
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            chunk_size: 16,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Script the replacements returned for `path` + `description`
    #[must_use]
    pub fn with_replacements(
        mut self,
        path: impl Into<String>,
        description: impl Into<String>,
        replacements: Vec<Replacement>,
    ) -> Self {
        self.scripts
            .insert((path.into(), description.into()), replacements);
        self
    }

    /// With delta size in characters
    #[inline]
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Number of edit calls started
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received, in call order
    #[must_use]
    pub fn requests(&self) -> Vec<EditRequest> {
        self.requests.lock().clone()
    }
}

impl Default for StaticEditService {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an encoded result into deltas of at most `size` characters
#[must_use]
pub fn encode_deltas(replacements: &[Replacement], size: usize) -> Vec<String> {
    let payload = serde_json::json!({ "replacements": replacements }).to_string();
    let chars: Vec<char> = payload.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[async_trait::async_trait]
impl EditService for StaticEditService {
    async fn start_streaming_edit(
        &self,
        cancel: CancellationToken,
        request: EditRequest,
    ) -> Result<EditStream, ComputeError> {
        if cancel.is_cancelled() {
            return Err(ComputeError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let key = (request.path.clone(), request.description.clone());
        self.requests.lock().push(request);

        let replacements = self.scripts.get(&key).ok_or_else(|| {
            ComputeError::StartFailed(format!("no edit scripted for {} ({})", key.0, key.1))
        })?;

        let chunks: Vec<Result<EditChunk, ComputeError>> = encode_deltas(replacements, self.chunk_size)
            .into_iter()
            .map(|delta| Ok(EditChunk::Delta(delta)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}
