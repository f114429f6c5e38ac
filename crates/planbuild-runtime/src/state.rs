//! Shared per-plan state
//!
//! `ActivePlanState` is owned by a single runtime actor. Nothing outside
//! the actor ever holds a reference to it; callers reach it through
//! [`PlanRuntime`](crate::PlanRuntime) commands, one at a time.

use chrono::{DateTime, Utc};
use planbuild_core::{resolve_baseline, ActiveBuild, Baseline, ContextSnapshot, CurrentPlanFiles};
use std::collections::{HashMap, VecDeque};
use tokio::sync::watch;

/// Outcome of appending a build to its path queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueAck {
    /// Path was idle: it is now marked building and the caller must run
    /// this build
    Claimed(ActiveBuild),
    /// A pipeline already owns the path and will drain the queue
    Queued {
        /// Builds waiting on the path, including the new one
        depth: usize,
    },
}

/// Per (plan, branch) build state
#[derive(Debug)]
pub struct ActivePlanState {
    build_queues_by_path: HashMap<String, VecDeque<ActiveBuild>>,
    is_building_by_path: HashMap<String, bool>,
    contexts_by_path: HashMap<String, ContextSnapshot>,
    current_plan_files: CurrentPlanFiles,
    building: usize,
    active_tx: watch::Sender<usize>,
}

impl ActivePlanState {
    pub(crate) fn new(active_tx: watch::Sender<usize>) -> Self {
        Self {
            build_queues_by_path: HashMap::new(),
            is_building_by_path: HashMap::new(),
            contexts_by_path: HashMap::new(),
            current_plan_files: CurrentPlanFiles::new(),
            building: 0,
            active_tx,
        }
    }

    /// Append a build and claim its path if nothing is running there
    ///
    /// When the path is idle its queue is necessarily empty, so the claimed
    /// build is the one just appended.
    pub(crate) fn enqueue(&mut self, build: ActiveBuild) -> EnqueueAck {
        let path = build.path.clone();
        let building = self.is_building(&path);
        let queue = self.build_queues_by_path.entry(path.clone()).or_default();
        queue.push_back(build);

        if building {
            return EnqueueAck::Queued { depth: queue.len() };
        }

        let next = queue.pop_front();
        match next {
            Some(next) => {
                self.set_building(&path, true);
                EnqueueAck::Claimed(next)
            }
            None => EnqueueAck::Queued { depth: 0 },
        }
    }

    /// Hand the next queued build to the running pipeline, or release the
    /// path when its queue is empty
    pub(crate) fn finish(&mut self, path: &str) -> Option<ActiveBuild> {
        let next = self
            .build_queues_by_path
            .get_mut(path)
            .and_then(VecDeque::pop_front);

        if next.is_none() {
            self.build_queues_by_path.remove(path);
            self.set_building(path, false);
        }
        next
    }

    /// Resolve the baseline for `path` against committed files and context
    pub(crate) fn resolve(&self, path: &str) -> (Baseline, Option<ContextSnapshot>) {
        let snapshot = self.contexts_by_path.get(path);
        let baseline = resolve_baseline(path, &self.current_plan_files, snapshot);
        (baseline, snapshot.cloned())
    }

    fn set_building(&mut self, path: &str, building: bool) {
        let was = self
            .is_building_by_path
            .insert(path.to_owned(), building)
            .unwrap_or(false);

        match (was, building) {
            (false, true) => self.building += 1,
            (true, false) => self.building -= 1,
            _ => return,
        }
        self.active_tx.send_replace(self.building);
    }

    /// Whether a pipeline currently owns `path`
    #[must_use]
    pub fn is_building(&self, path: &str) -> bool {
        self.is_building_by_path.get(path).copied().unwrap_or(false)
    }

    /// Builds waiting on `path` (excluding the one running)
    #[must_use]
    pub fn queued(&self, path: &str) -> usize {
        self.build_queues_by_path.get(path).map_or(0, VecDeque::len)
    }

    /// Paths with queued builds, in no particular order
    #[must_use]
    pub fn queued_paths(&self) -> Vec<String> {
        self.build_queues_by_path
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Number of paths with a running pipeline
    #[must_use]
    pub fn building_count(&self) -> usize {
        self.building
    }

    /// Context snapshot for `path`
    #[must_use]
    pub fn context(&self, path: &str) -> Option<&ContextSnapshot> {
        self.contexts_by_path.get(path)
    }

    /// Replace the context snapshot for `path`
    pub fn set_context(&mut self, path: impl Into<String>, snapshot: ContextSnapshot) {
        self.contexts_by_path.insert(path.into(), snapshot);
    }

    /// Drop the context snapshot for `path`
    pub fn remove_context(&mut self, path: &str) -> Option<ContextSnapshot> {
        self.contexts_by_path.remove(path)
    }

    /// Committed plan files
    #[must_use]
    pub fn current_plan_files(&self) -> &CurrentPlanFiles {
        &self.current_plan_files
    }

    /// Record a committed version of `path`
    pub fn commit_file(
        &mut self,
        path: impl Into<String>,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.current_plan_files.commit(path, content, at);
    }
}
