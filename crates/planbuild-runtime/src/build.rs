//! Build entrypoint
//!
//! Loads a plan's pending builds, marks the plan as building and hands each
//! path group to a dispatcher. Returns as soon as every build is queued:
//! the completion signal and the return value mean "dispatch accepted".
//! Use [`PlanBuilder::wait_all`] to wait for the files themselves.

use crate::dispatch::Dispatcher;
use crate::pipeline::BuildContext;
use crate::registry::PlanRegistry;
use crate::runtime::PlanRuntime;
use futures::future::join_all;
use planbuild_core::{Auth, BuildError, EditService, PlanKey, PlanStatus, PlanStore};
use std::sync::Arc;

/// Top-level build coordinator
#[derive(Clone)]
pub struct PlanBuilder {
    registry: Arc<PlanRegistry>,
    store: Arc<dyn PlanStore>,
    service: Arc<dyn EditService>,
}

impl std::fmt::Debug for PlanBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanBuilder")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl PlanBuilder {
    /// Create builder
    #[inline]
    #[must_use]
    pub fn new(
        registry: Arc<PlanRegistry>,
        store: Arc<dyn PlanStore>,
        service: Arc<dyn EditService>,
    ) -> Self {
        Self {
            registry,
            store,
            service,
        }
    }

    /// Runtime registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<PlanRegistry> {
        &self.registry
    }

    /// Start building every pending file of `plan`
    ///
    /// Emits exactly one completion signal on the plan runtime. Returns the
    /// number of path groups dispatched.
    ///
    /// # Errors
    /// - `BuildError::LoadFailed` if pending builds cannot be loaded
    /// - `BuildError::StatusTransition` if the plan cannot be marked building
    ///
    /// In both cases no pipeline is started.
    pub async fn build(&self, plan: &PlanKey, auth: &Auth) -> Result<usize, BuildError> {
        tracing::info!(plan = %plan, "starting build");
        let runtime = self.registry.get_or_create(plan);

        let pending = match self.store.load_pending_builds(plan).await {
            Ok(pending) => pending,
            Err(e) => return abort(&runtime, BuildError::LoadFailed(e)),
        };

        if pending.is_empty() {
            tracing::info!(plan = %plan, "no pending builds");
            runtime.signal_done(Ok(()));
            return Ok(0);
        }

        if let Err(e) = self
            .store
            .set_plan_status(plan, PlanStatus::Building, "")
            .await
        {
            return abort(&runtime, BuildError::StatusTransition(e));
        }

        let groups = pending.len();
        tracing::info!(plan = %plan, groups, "dispatching builds");

        let dispatcher = Dispatcher::new(BuildContext {
            runtime: runtime.clone(),
            store: Arc::clone(&self.store),
            service: Arc::clone(&self.service),
            auth: auth.clone(),
            policy: self.registry.config().failure_policy,
        });

        let dispatched = join_all(pending.into_iter().map(|(path, builds)| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.queue_builds(&path, builds).await }
        }))
        .await;

        if let Some(err) = dispatched.into_iter().find_map(Result::err) {
            return abort(&runtime, err);
        }

        runtime.signal_done(Ok(()));
        Ok(groups)
    }

    /// Wait until every dispatched file of `plan` has finished
    ///
    /// Returns immediately for a plan without a runtime.
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the runtime stopped mid-wait
    pub async fn wait_all(&self, plan: &PlanKey) -> Result<(), BuildError> {
        match self.registry.get(plan) {
            Some(runtime) => runtime.wait_idle().await,
            None => Ok(()),
        }
    }
}

fn abort(runtime: &PlanRuntime, err: BuildError) -> Result<usize, BuildError> {
    tracing::error!(plan = %runtime.key(), error = %err, "build aborted");
    runtime.signal_done(Err(err.clone()));
    Err(err)
}
