//! Core types for plan builds
//!
//! Defines the fundamental types shared by the coordinator:
//! - Plan and build identifiers
//! - Queued edits (`ActiveBuild`) and their per-path grouping
//! - Content snapshots and committed plan files
//! - Build results and outbound stream messages

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ulid::Ulid;

/// Unique plan identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlanId(pub Ulid);

impl PlanId {
    /// Generate new plan ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique build identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildId(pub Ulid);

impl BuildId {
    /// Generate new build ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a plan runtime: a plan plus one of its branches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanKey {
    /// Plan being built
    pub plan_id: PlanId,
    /// Independent line of edits within the plan
    pub branch: String,
}

impl PlanKey {
    /// Create new plan key
    #[inline]
    #[must_use]
    pub fn new(plan_id: PlanId, branch: impl Into<String>) -> Self {
        Self {
            plan_id,
            branch: branch.into(),
        }
    }
}

impl std::fmt::Display for PlanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.plan_id, self.branch)
    }
}

/// Credentials context for a build invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    /// Organization the plan belongs to
    pub org_id: String,
    /// User that requested the build
    pub user_id: String,
}

impl Auth {
    /// Create new auth context
    #[inline]
    #[must_use]
    pub fn new(org_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// One requested file edit
///
/// Created by the planning stage and consumed exactly once by the edit
/// pipeline. `file_content` is the full candidate content, used verbatim
/// when the path has no baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBuild {
    /// Build record this edit belongs to
    pub id: BuildId,
    /// Conversation message that produced the edit
    pub convo_message_id: String,
    /// Target file path
    pub path: String,
    /// Natural-language description of the change
    pub file_description: String,
    /// Candidate full content
    pub file_content: String,
}

impl ActiveBuild {
    /// Create new active build with a fresh build id
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        file_description: impl Into<String>,
        file_content: impl Into<String>,
    ) -> Self {
        Self {
            id: BuildId::new(),
            convo_message_id: String::new(),
            path: path.into(),
            file_description: file_description.into(),
            file_content: file_content.into(),
        }
    }

    /// With originating conversation message
    #[inline]
    #[must_use]
    pub fn with_convo_message(mut self, convo_message_id: impl Into<String>) -> Self {
        self.convo_message_id = convo_message_id.into();
        self
    }

    /// With build id
    #[inline]
    #[must_use]
    pub fn with_build_id(mut self, id: BuildId) -> Self {
        self.id = id;
        self
    }
}

/// Pending edits grouped by path, in load order
pub type PendingBuildsByPath = IndexMap<String, Vec<ActiveBuild>>;

/// Externally supplied reference content for a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// File content
    pub body: String,
    /// When the upstream source last changed this content
    pub updated_at: DateTime<Utc>,
}

impl ContextSnapshot {
    /// Create new snapshot
    #[inline]
    #[must_use]
    pub fn new(body: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            body: body.into(),
            updated_at,
        }
    }
}

/// A committed plan file version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedFile<'a> {
    /// Committed content
    pub content: &'a str,
    /// Commit time, if recorded
    pub updated_at: Option<DateTime<Utc>>,
}

/// The plan's most recently committed file versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPlanFiles {
    /// Content by path
    pub files: HashMap<String, String>,
    /// Last update time by path
    pub updated_at_by_path: HashMap<String, DateTime<Utc>>,
}

impl CurrentPlanFiles {
    /// Create empty file set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the committed version of a path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<CommittedFile<'_>> {
        self.files.get(path).map(|content| CommittedFile {
            content,
            updated_at: self.updated_at_by_path.get(path).copied(),
        })
    }

    /// Record a new committed version of a path
    pub fn commit(&mut self, path: impl Into<String>, content: impl Into<String>, at: DateTime<Utc>) {
        let path = path.into();
        self.updated_at_by_path.insert(path.clone(), at);
        self.files.insert(path, content.into());
    }

    /// Number of committed paths
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no path has been committed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// One textual replacement produced by the edit service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    /// Text to find
    pub old: String,
    /// Text to put in its place
    pub new: String,
}

impl Replacement {
    /// Create new replacement
    #[inline]
    #[must_use]
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }
}

/// Outcome of one active build, ready for persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Owning organization
    pub org_id: String,
    /// Owning plan
    pub plan_id: PlanId,
    /// Build record
    pub build_id: BuildId,
    /// Originating conversation message
    pub convo_message_id: String,
    /// File path
    pub path: String,
    /// New or patched content
    pub content: String,
    /// Replacements that produced `content` (empty for new files)
    pub replacements: Vec<Replacement>,
}

/// Plan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Plan created, nothing running
    Draft,
    /// Model is replying
    Replying,
    /// File builds in progress
    Building,
    /// All work finished
    Finished,
    /// Plan stopped on error
    Error,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Replying => "replying",
            Self::Building => "building",
            Self::Finished => "finished",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-file build progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    /// File path
    pub path: String,
    /// Tokens received from the edit service so far
    pub num_tokens: usize,
    /// Whether this build has completed
    pub finished: bool,
}

impl BuildInfo {
    /// Build started or progressing
    #[inline]
    #[must_use]
    pub fn progress(path: impl Into<String>, num_tokens: usize) -> Self {
        Self {
            path: path.into(),
            num_tokens,
            finished: false,
        }
    }

    /// Build completed
    #[inline]
    #[must_use]
    pub fn finished(path: impl Into<String>, num_tokens: usize) -> Self {
        Self {
            path: path.into(),
            num_tokens,
            finished: true,
        }
    }
}

/// Message sent on a plan's outbound stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamMessage {
    /// Progress for one file build
    BuildInfo(BuildInfo),
    /// One file build failed
    BuildFailed {
        /// File path
        path: String,
        /// Failure description
        message: String,
    },
}

impl StreamMessage {
    /// Path this message refers to
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::BuildInfo(info) => &info.path,
            Self::BuildFailed { path, .. } => path,
        }
    }

    /// Whether this is a `finished=true` build info
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::BuildInfo(info) if info.finished)
    }
}
