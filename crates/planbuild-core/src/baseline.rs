//! Baseline resolution
//!
//! Decides which content an edit is applied against. The committed plan
//! version wins ties: a context snapshot only overrides it when the snapshot
//! is strictly newer.

use crate::types::{ContextSnapshot, CurrentPlanFiles};

/// Where a resolved baseline came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineSource {
    /// Path exists in neither source
    None,
    /// Context snapshot content
    Snapshot,
    /// Committed plan file content
    Committed,
}

/// Content an edit applies against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    /// Resolved content (empty for new files)
    pub content: String,
    /// Origin of `content`
    pub source: BaselineSource,
}

impl Baseline {
    /// Whether the edit creates a new file
    #[inline]
    #[must_use]
    pub fn is_new_file(&self) -> bool {
        self.content.is_empty()
    }
}

/// Resolve the baseline for `path`
///
/// A committed file without a recorded update time is treated as older than
/// any snapshot.
#[must_use]
pub fn resolve_baseline(
    path: &str,
    current: &CurrentPlanFiles,
    snapshot: Option<&ContextSnapshot>,
) -> Baseline {
    let (content, source) = match (current.get(path), snapshot) {
        (None, None) => {
            tracing::debug!(path, "not in current plan or context");
            (String::new(), BaselineSource::None)
        }
        (None, Some(snapshot)) => {
            tracing::debug!(path, "found in context, using snapshot");
            if snapshot.body.is_empty() {
                tracing::warn!(path, "context snapshot is empty");
            }
            (snapshot.body.clone(), BaselineSource::Snapshot)
        }
        (Some(committed), None) => {
            tracing::debug!(path, "no context, using current plan state");
            (committed.content.to_owned(), BaselineSource::Committed)
        }
        (Some(committed), Some(snapshot)) => {
            let snapshot_newer = committed
                .updated_at
                .map_or(true, |at| snapshot.updated_at > at);
            if snapshot_newer {
                tracing::debug!(path, "context is newer than current plan file");
                if snapshot.body.is_empty() {
                    tracing::warn!(path, "context snapshot is empty");
                }
                (snapshot.body.clone(), BaselineSource::Snapshot)
            } else {
                tracing::debug!(path, "current plan file is not older than context");
                (committed.content.to_owned(), BaselineSource::Committed)
            }
        }
    };

    Baseline { content, source }
}
