//! Plan runtime actor
//!
//! Each (plan, branch) gets one actor task that owns its
//! [`ActivePlanState`]. Every read and write goes through a [`PlanCommand`]
//! on the actor's mailbox, so no two mutations ever interleave. The
//! [`PlanRuntime`] handle wraps the mailbox together with the plan's
//! outbound stream, completion signal and cancellation context.
//!
//! The completion signal keeps the value of the latest build invocation,
//! so an observer that subscribes after `build` returned still sees it.

use crate::state::{ActivePlanState, EnqueueAck};
use chrono::{DateTime, Utc};
use planbuild_core::{
    ActiveBuild, Baseline, BuildConfig, BuildError, ContextSnapshot, PlanKey, StreamMessage,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Closure applied to the state by [`PlanCommand::Update`]
pub type UpdateFn = Box<dyn FnOnce(&mut ActivePlanState) + Send>;

/// Completion signal for one top-level build invocation
///
/// `Ok(())` means every pending build was accepted for dispatch, not that
/// the builds finished.
pub type DispatchSignal = Result<(), BuildError>;

/// Commands accepted by the runtime actor
pub enum PlanCommand {
    /// Append a build to its path queue, claiming the path if idle
    Enqueue {
        /// Build to queue
        build: ActiveBuild,
        /// Claim or queue acknowledgement
        reply: oneshot::Sender<EnqueueAck>,
    },
    /// Pop the next build for a path or release it
    Finish {
        /// Path whose pipeline finished a build
        path: String,
        /// Next build to run, if any
        reply: oneshot::Sender<Option<ActiveBuild>>,
    },
    /// Resolve the baseline for a path
    ResolveBaseline {
        /// File path
        path: String,
        /// Baseline and the snapshot considered
        reply: oneshot::Sender<(Baseline, Option<ContextSnapshot>)>,
    },
    /// Record a committed file version
    CommitFile {
        /// File path
        path: String,
        /// New content
        content: String,
        /// Commit time
        at: DateTime<Utc>,
        /// Acknowledgement
        reply: oneshot::Sender<()>,
    },
    /// Replace a path's context snapshot
    SetContext {
        /// File path
        path: String,
        /// New snapshot
        snapshot: ContextSnapshot,
        /// Acknowledgement
        reply: oneshot::Sender<()>,
    },
    /// Arbitrary serialized update
    Update(UpdateFn),
}

impl std::fmt::Debug for PlanCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enqueue { build, .. } => f.debug_struct("Enqueue").field("path", &build.path).finish(),
            Self::Finish { path, .. } => f.debug_struct("Finish").field("path", path).finish(),
            Self::ResolveBaseline { path, .. } => {
                f.debug_struct("ResolveBaseline").field("path", path).finish()
            }
            Self::CommitFile { path, .. } => f.debug_struct("CommitFile").field("path", path).finish(),
            Self::SetContext { path, .. } => f.debug_struct("SetContext").field("path", path).finish(),
            Self::Update(_) => f.write_str("Update"),
        }
    }
}

impl PlanCommand {
    fn apply(self, state: &mut ActivePlanState) {
        // Replies are dropped silently when the requester went away.
        match self {
            Self::Enqueue { build, reply } => {
                let _ = reply.send(state.enqueue(build));
            }
            Self::Finish { path, reply } => {
                let _ = reply.send(state.finish(&path));
            }
            Self::ResolveBaseline { path, reply } => {
                let _ = reply.send(state.resolve(&path));
            }
            Self::CommitFile {
                path,
                content,
                at,
                reply,
            } => {
                state.commit_file(path, content, at);
                let _ = reply.send(());
            }
            Self::SetContext {
                path,
                snapshot,
                reply,
            } => {
                state.set_context(path, snapshot);
                let _ = reply.send(());
            }
            Self::Update(f) => f(state),
        }
    }
}

async fn run_actor(key: PlanKey, mut state: ActivePlanState, mut rx: mpsc::Receiver<PlanCommand>) {
    tracing::debug!(plan = %key, "plan runtime started");
    while let Some(cmd) = rx.recv().await {
        tracing::trace!(plan = %key, ?cmd, "applying command");
        cmd.apply(&mut state);
    }
    tracing::debug!(plan = %key, "plan runtime stopped");
}

#[derive(Debug)]
struct Inner {
    key: PlanKey,
    commands: mpsc::Sender<PlanCommand>,
    stream: broadcast::Sender<StreamMessage>,
    done: watch::Sender<Option<DispatchSignal>>,
    active: watch::Receiver<usize>,
    cancel: CancellationToken,
}

/// Handle to a plan runtime
///
/// Cheap to clone; the actor stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct PlanRuntime {
    inner: Arc<Inner>,
}

impl PlanRuntime {
    /// Spawn a runtime actor for `key`
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    /// `BuildError::Config` if `config` has a zero capacity
    pub fn spawn(key: PlanKey, config: &BuildConfig) -> Result<Self, BuildError> {
        config.validate()?;
        Ok(Self::spawn_validated(key, config))
    }

    /// Spawn with a config that already passed [`BuildConfig::validate`]
    pub(crate) fn spawn_validated(key: PlanKey, config: &BuildConfig) -> Self {
        let (commands, rx) = mpsc::channel(config.mailbox_capacity);
        let (stream, _) = broadcast::channel(config.stream_capacity);
        let (done, _) = watch::channel(None);
        let (active_tx, active) = watch::channel(0);

        tokio::spawn(run_actor(key.clone(), ActivePlanState::new(active_tx), rx));

        Self {
            inner: Arc::new(Inner {
                key,
                commands,
                stream,
                done,
                active,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Plan this runtime belongs to
    #[inline]
    #[must_use]
    pub fn key(&self) -> &PlanKey {
        &self.inner.key
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> PlanCommand,
    ) -> Result<R, BuildError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(make(tx))
            .await
            .map_err(|_| BuildError::RuntimeClosed)?;
        rx.await.map_err(|_| BuildError::RuntimeClosed)
    }

    /// Append a build to its path queue
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the actor is gone
    pub async fn enqueue(&self, build: ActiveBuild) -> Result<EnqueueAck, BuildError> {
        self.request(|reply| PlanCommand::Enqueue { build, reply }).await
    }

    /// Report a finished build and take the next one for `path`
    ///
    /// `None` means the path was released.
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the actor is gone
    pub async fn finish(&self, path: &str) -> Result<Option<ActiveBuild>, BuildError> {
        let path = path.to_owned();
        self.request(|reply| PlanCommand::Finish { path, reply }).await
    }

    /// Resolve the baseline for `path`
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the actor is gone
    pub async fn resolve_baseline(
        &self,
        path: &str,
    ) -> Result<(Baseline, Option<ContextSnapshot>), BuildError> {
        let path = path.to_owned();
        self.request(|reply| PlanCommand::ResolveBaseline { path, reply })
            .await
    }

    /// Record a committed version of `path`
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the actor is gone
    pub async fn commit_file(
        &self,
        path: impl Into<String>,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), BuildError> {
        let (path, content) = (path.into(), content.into());
        self.request(|reply| PlanCommand::CommitFile {
            path,
            content,
            at,
            reply,
        })
        .await
    }

    /// Replace the context snapshot for `path`
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the actor is gone
    pub async fn set_context(
        &self,
        path: impl Into<String>,
        snapshot: ContextSnapshot,
    ) -> Result<(), BuildError> {
        let path = path.into();
        self.request(|reply| PlanCommand::SetContext {
            path,
            snapshot,
            reply,
        })
        .await
    }

    /// Apply `f` to the state with exclusive access and return its result
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the actor is gone
    pub async fn update<R, F>(&self, f: F) -> Result<R, BuildError>
    where
        F: FnOnce(&mut ActivePlanState) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.request(|reply| {
            PlanCommand::Update(Box::new(move |state| {
                let _ = reply.send(f(state));
            }))
        })
        .await
    }

    /// Send a message to every stream subscriber
    pub fn stream(&self, message: StreamMessage) {
        // No subscribers is not an error.
        let _ = self.inner.stream.send(message);
    }

    /// Subscribe to the outbound progress stream
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamMessage> {
        self.inner.stream.subscribe()
    }

    /// Emit the completion signal for a build invocation
    ///
    /// Replaces the signal of any earlier invocation.
    pub fn signal_done(&self, signal: DispatchSignal) {
        self.inner.done.send_replace(Some(signal));
    }

    /// Watch completion signals; `None` until the first invocation signals
    ///
    /// Use [`watch::Receiver::changed`] to wait for the next invocation.
    #[must_use]
    pub fn subscribe_done(&self) -> watch::Receiver<Option<DispatchSignal>> {
        self.inner.done.subscribe()
    }

    /// Signal of the latest build invocation, if any
    #[must_use]
    pub fn last_done(&self) -> Option<DispatchSignal> {
        self.inner.done.borrow().clone()
    }

    /// Wait until some build invocation has signalled and return its signal
    ///
    /// Returns at once when a signal was already emitted.
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the signal sender is gone
    pub async fn wait_done(&self) -> Result<DispatchSignal, BuildError> {
        let mut rx = self.inner.done.subscribe();
        let signal = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BuildError::RuntimeClosed)?;
        Ok(signal.clone().unwrap_or(Err(BuildError::RuntimeClosed)))
    }

    /// Plan-scoped cancellation context
    #[inline]
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Cancel all outstanding work for this plan
    pub fn cancel(&self) {
        tracing::info!(plan = %self.inner.key, "cancelling plan runtime");
        self.inner.cancel.cancel();
    }

    /// Number of paths with a running pipeline
    #[must_use]
    pub fn active_pipelines(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Wait until no path has a running pipeline
    ///
    /// This is the "all files finished" join. A path stalled by
    /// [`FailurePolicy::Stall`](planbuild_core::FailurePolicy::Stall) keeps
    /// this pending.
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the actor stopped while work was active
    pub async fn wait_idle(&self) -> Result<(), BuildError> {
        let mut active = self.inner.active.clone();
        active
            .wait_for(|n| *n == 0)
            .await
            .map(|_| ())
            .map_err(|_| BuildError::RuntimeClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planbuild_core::{BuildInfo, PlanId};

    fn runtime() -> PlanRuntime {
        PlanRuntime::spawn(PlanKey::new(PlanId::new(), "main"), &BuildConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn enqueue_claims_then_queues() {
        let rt = runtime();

        let ack = rt.enqueue(ActiveBuild::new("a.rs", "one", "")).await.unwrap();
        assert!(matches!(ack, EnqueueAck::Claimed(_)));
        assert_eq!(rt.active_pipelines(), 1);

        let ack = rt.enqueue(ActiveBuild::new("a.rs", "two", "")).await.unwrap();
        assert_eq!(ack, EnqueueAck::Queued { depth: 1 });
    }

    #[tokio::test]
    async fn finish_releases_and_wait_idle_returns() {
        let rt = runtime();
        rt.enqueue(ActiveBuild::new("a.rs", "one", "")).await.unwrap();

        let waiter = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.wait_idle().await })
        };

        assert!(rt.finish("a.rs").await.unwrap().is_none());
        waiter.await.unwrap().unwrap();
        assert_eq!(rt.active_pipelines(), 0);
    }

    #[tokio::test]
    async fn update_runs_serialized_closure() {
        let rt = runtime();
        rt.enqueue(ActiveBuild::new("a.rs", "one", "")).await.unwrap();
        rt.enqueue(ActiveBuild::new("a.rs", "two", "")).await.unwrap();

        let (building, queued) = rt
            .update(|state| (state.is_building("a.rs"), state.queued("a.rs")))
            .await
            .unwrap();
        assert!(building);
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn set_context_feeds_baseline() {
        let rt = runtime();
        rt.set_context("a.rs", ContextSnapshot::new("ctx", Utc::now()))
            .await
            .unwrap();

        let (baseline, snapshot) = rt.resolve_baseline("a.rs").await.unwrap();
        assert_eq!(baseline.content, "ctx");
        assert!(snapshot.is_some());
    }

    #[tokio::test]
    async fn stream_reaches_subscribers() {
        let rt = runtime();
        let mut rx = rt.subscribe();

        rt.stream(StreamMessage::BuildInfo(BuildInfo::progress("a.rs", 0)));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.path(), "a.rs");
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let key = PlanKey::new(PlanId::new(), "main");
        for config in [
            BuildConfig::new().with_stream_capacity(0),
            BuildConfig::new().with_mailbox_capacity(0),
        ] {
            let err = PlanRuntime::spawn(key.clone(), &config).unwrap_err();
            assert!(matches!(err, BuildError::Config(_)));
        }
    }

    #[tokio::test]
    async fn done_signal_survives_for_late_subscribers() {
        let rt = runtime();
        assert!(rt.last_done().is_none());

        rt.signal_done(Ok(()));
        let late = rt.subscribe_done();
        assert_eq!(*late.borrow(), Some(Ok(())));
        assert_eq!(rt.wait_done().await.unwrap(), Ok(()));

        rt.signal_done(Err(BuildError::RuntimeClosed));
        assert_eq!(rt.last_done(), Some(Err(BuildError::RuntimeClosed)));
    }

    #[tokio::test]
    async fn wait_done_blocks_until_signalled() {
        let rt = runtime();
        let waiter = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.wait_done().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        rt.signal_done(Ok(()));
        assert_eq!(waiter.await.unwrap().unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn cancel_fires_token() {
        let rt = runtime();
        let token = rt.cancel_token().clone();
        rt.cancel();
        assert!(token.is_cancelled());
    }
}
