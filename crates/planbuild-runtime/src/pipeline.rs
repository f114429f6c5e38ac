//! Edit pipeline
//!
//! One pipeline owns one path at a time. It runs the build it was started
//! with, then keeps pulling the path's queue until it is empty and the path
//! is released:
//!
//! ```text
//! Dispatched -> BaselineResolved -> NewFile ----------------> Applied -> Finished
//!                                \-> AwaitingComputation --/            |
//!                                                       next queued <---/
//! ```

use crate::runtime::PlanRuntime;
use crate::stream::consume_edit_stream;
use chrono::Utc;
use planbuild_core::{
    apply_replacements, ActiveBuild, Auth, Baseline, BuildError, BuildInfo, BuildResult,
    ComputeError, ContextSnapshot, EditRequest, EditService, FailurePolicy, PlanStore,
    Replacement, StreamMessage,
};
use std::sync::Arc;

/// Pipeline stage, for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Path claimed, start reported
    Dispatched,
    /// Baseline chosen
    BaselineResolved,
    /// No baseline: candidate content used verbatim
    NewFile,
    /// Waiting on the edit service
    AwaitingComputation,
    /// Result persisted and committed
    Applied,
    /// Build done, checking the path queue
    Finished,
}

/// Working state for one build
#[derive(Debug, Clone)]
pub struct FileBuildState {
    /// File path
    pub path: String,
    /// Build being processed
    pub build: ActiveBuild,
    /// Resolved baseline
    pub baseline: Baseline,
    /// Snapshot considered during resolution
    pub context: Option<ContextSnapshot>,
}

/// Result of one build, ready to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedEdit {
    /// Result to persist
    pub result: BuildResult,
    /// Tokens received from the edit service (0 for new files)
    pub num_tokens: usize,
}

/// Shared dependencies of dispatchers and pipelines for one plan
#[derive(Clone)]
pub struct BuildContext {
    /// Plan runtime
    pub runtime: PlanRuntime,
    /// Persistent store
    pub store: Arc<dyn PlanStore>,
    /// Edit service
    pub service: Arc<dyn EditService>,
    /// Credentials of the build invocation
    pub auth: Auth,
    /// Per-path failure handling
    pub policy: FailurePolicy,
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("plan", self.runtime.key())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Serial build loop for one path
#[derive(Debug, Clone)]
pub struct EditPipeline {
    ctx: BuildContext,
}

impl EditPipeline {
    /// Create pipeline
    #[inline]
    #[must_use]
    pub fn new(ctx: BuildContext) -> Self {
        Self { ctx }
    }

    /// Run `first`, then drain the path queue
    ///
    /// The path must already be claimed for this pipeline. Returns when the
    /// path is released, or when a failure stalls it.
    pub async fn run(self, first: ActiveBuild) {
        let path = first.path.clone();
        let plan = self.ctx.runtime.key().clone();
        let mut current = first;

        loop {
            if !self.run_with_policy(&current).await {
                tracing::warn!(plan = %plan, path = %path, "path stalled, queued builds held");
                return;
            }

            tracing::debug!(plan = %plan, path = %path, stage = ?Stage::Finished, "checking queue");
            match self.ctx.runtime.finish(&path).await {
                Ok(Some(next)) => {
                    tracing::debug!(plan = %plan, path = %path, build = %next.id, "next queued build");
                    current = next;
                }
                Ok(None) => {
                    tracing::debug!(plan = %plan, path = %path, "queue drained, path released");
                    return;
                }
                Err(e) => {
                    tracing::error!(plan = %plan, path = %path, error = %e, "lost plan runtime");
                    return;
                }
            }
        }
    }

    /// Run one build under the failure policy
    ///
    /// Reports the start once, however many attempts follow. A computed
    /// result whose persist failed is kept, so a retry only persists again.
    /// Returns `false` when the path must stay held.
    async fn run_with_policy(&self, build: &ActiveBuild) -> bool {
        let runtime = &self.ctx.runtime;
        let max_attempts = self.ctx.policy.max_attempts();
        let mut computed: Option<ComputedEdit> = None;
        let mut attempt = 1;

        tracing::debug!(path = %build.path, stage = ?Stage::Dispatched);
        runtime.stream(StreamMessage::BuildInfo(BuildInfo::progress(&build.path, 0)));

        loop {
            let outcome = match computed.take() {
                Some(edit) => Ok(edit),
                None => self.compute(build).await,
            };
            let err = match outcome {
                Ok(edit) => match self.apply(&edit.result).await {
                    Ok(()) => {
                        runtime.stream(StreamMessage::BuildInfo(BuildInfo::finished(
                            &build.path,
                            edit.num_tokens,
                        )));
                        tracing::info!(
                            path = %edit.result.path,
                            build = %edit.result.build_id,
                            replacements = edit.result.replacements.len(),
                            attempt,
                            "build finished"
                        );
                        return true;
                    }
                    Err(err) => {
                        if matches!(err, BuildError::Persist { .. }) {
                            computed = Some(edit);
                        }
                        err
                    }
                },
                Err(err) => err,
            };

            tracing::error!(path = %build.path, build = %build.id, attempt, error = %err, "build failed");

            if matches!(err, BuildError::RuntimeClosed) {
                return false;
            }
            if err.is_retryable() && attempt < max_attempts {
                attempt += 1;
                tracing::warn!(
                    path = %build.path,
                    attempt,
                    max_attempts,
                    recompute = computed.is_none(),
                    "retrying build"
                );
                continue;
            }

            runtime.stream(StreamMessage::BuildFailed {
                path: build.path.clone(),
                message: err.to_string(),
            });
            return !self.ctx.policy.stalls();
        }
    }

    /// Produce the result for one build without persisting it
    ///
    /// New files take the candidate content; everything else goes through
    /// the edit service. Progress is streamed while the edit is consumed.
    ///
    /// # Errors
    /// Any path-scoped `BuildError`, or `RuntimeClosed`
    pub async fn compute(&self, build: &ActiveBuild) -> Result<ComputedEdit, BuildError> {
        let runtime = &self.ctx.runtime;
        let path = build.path.as_str();

        let cancel = runtime.cancel_token().clone();
        if cancel.is_cancelled() {
            return Err(BuildError::ComputationStart {
                path: path.to_owned(),
                source: ComputeError::Cancelled,
            });
        }

        let (baseline, context) = runtime.resolve_baseline(path).await?;
        let state = FileBuildState {
            path: path.to_owned(),
            build: build.clone(),
            baseline,
            context,
        };
        tracing::debug!(path, stage = ?Stage::BaselineResolved, source = ?state.baseline.source);

        if state.baseline.is_new_file() {
            tracing::info!(path, stage = ?Stage::NewFile, "creating new file");
            return Ok(ComputedEdit {
                result: self.result(&state, build.file_content.clone(), Vec::new()),
                num_tokens: 0,
            });
        }

        let request = EditRequest {
            path: state.path.clone(),
            baseline: state.baseline.content.clone(),
            description: build.file_description.clone(),
            candidate: build.file_content.clone(),
        };

        tracing::debug!(path, stage = ?Stage::AwaitingComputation, "calling edit service");
        let stream = self
            .ctx
            .service
            .start_streaming_edit(cancel.clone(), request)
            .await
            .map_err(|source| BuildError::ComputationStart {
                path: path.to_owned(),
                source,
            })?;

        let edit = consume_edit_stream(stream, &cancel, |num_tokens| {
            runtime.stream(StreamMessage::BuildInfo(BuildInfo::progress(path, num_tokens)));
        })
        .await
        .map_err(|source| BuildError::ComputationStream {
            path: path.to_owned(),
            source,
        })?;

        let content = apply_replacements(&state.baseline.content, &edit.replacements).map_err(
            |source| BuildError::Apply {
                path: path.to_owned(),
                source,
            },
        )?;

        Ok(ComputedEdit {
            result: self.result(&state, content, edit.replacements),
            num_tokens: edit.num_tokens,
        })
    }

    fn result(
        &self,
        state: &FileBuildState,
        content: String,
        replacements: Vec<Replacement>,
    ) -> BuildResult {
        BuildResult {
            org_id: self.ctx.auth.org_id.clone(),
            plan_id: self.ctx.runtime.key().plan_id,
            build_id: state.build.id,
            convo_message_id: state.build.convo_message_id.clone(),
            path: state.path.clone(),
            content,
            replacements,
        }
    }

    /// Persist the result and make it the path's committed version
    async fn apply(&self, result: &BuildResult) -> Result<(), BuildError> {
        self.ctx
            .store
            .persist_build_result(result)
            .await
            .map_err(|source| BuildError::Persist {
                path: result.path.clone(),
                source,
            })?;
        self.ctx
            .runtime
            .commit_file(result.path.clone(), result.content.clone(), Utc::now())
            .await?;
        tracing::debug!(path = %result.path, stage = ?Stage::Applied);
        Ok(())
    }
}
