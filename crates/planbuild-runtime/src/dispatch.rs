//! Per-path dispatch
//!
//! Every incoming build is appended to its path queue first; only the
//! enqueue acknowledgement decides whether a new pipeline starts. A path
//! that is already building just grows its queue and the running pipeline
//! picks the new builds up when it next checks for work.

use crate::pipeline::{BuildContext, EditPipeline};
use crate::state::EnqueueAck;
use planbuild_core::{ActiveBuild, BuildError};

/// Queues builds and starts at most one pipeline per path
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ctx: BuildContext,
}

impl Dispatcher {
    /// Create dispatcher
    #[inline]
    #[must_use]
    pub fn new(ctx: BuildContext) -> Self {
        Self { ctx }
    }

    /// Queue `builds` for `path` in the given order
    ///
    /// Returns the number of pipelines started (0 or 1).
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the plan runtime is gone
    pub async fn queue_builds(
        &self,
        path: &str,
        builds: Vec<ActiveBuild>,
    ) -> Result<usize, BuildError> {
        let plan = self.ctx.runtime.key();
        let mut started = 0;

        for build in builds {
            if build.path != path {
                tracing::warn!(plan = %plan, path, build_path = %build.path, "build grouped under another path");
            }

            match self.ctx.runtime.enqueue(build).await? {
                EnqueueAck::Claimed(build) => {
                    tracing::info!(plan = %plan, path = %build.path, "not building, will execute now");
                    let pipeline = EditPipeline::new(self.ctx.clone());
                    tokio::spawn(pipeline.run(build));
                    started += 1;
                }
                EnqueueAck::Queued { depth } => {
                    tracing::info!(plan = %plan, path, depth, "already building, queued");
                }
            }
        }

        Ok(started)
    }
}
