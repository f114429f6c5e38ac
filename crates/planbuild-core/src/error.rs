//! Error types for plan builds
//!
//! Provides error handling for:
//! - Storage failures (loading edits, status transitions, persistence)
//! - Edit service failures (start and mid-stream)
//! - Replacement application
//! - Runtime and configuration errors
//!
//! All errors are `Clone` so a single failure can be both returned to the
//! caller and broadcast as a plan's completion signal.

/// Persistent store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Write conflicted with concurrent state
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Edit service errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComputeError {
    /// Streaming call could not be initiated
    #[error("failed to start edit stream: {0}")]
    StartFailed(String),

    /// Stream failed after it started
    #[error("edit stream failed: {0}")]
    Stream(String),

    /// Stream finished but its result could not be decoded
    #[error("malformed edit result: {0}")]
    MalformedResult(String),

    /// Plan context was cancelled
    #[error("edit stream cancelled")]
    Cancelled,
}

/// Replacement application errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplacementError {
    /// `old` text was not present in the content
    #[error("replacement target not found: {old:?}")]
    NotFound {
        /// Text that was searched for
        old: String,
    },
}

/// Main build error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Pending edits could not be loaded
    #[error("failed to load pending builds: {0}")]
    LoadFailed(#[source] StoreError),

    /// Plan status could not be set to building
    #[error("error setting plan status to building: {0}")]
    StatusTransition(#[source] StoreError),

    /// Edit service call could not be initiated for one file
    #[error("failed to start edit for {path}: {source}")]
    ComputationStart {
        /// File path
        path: String,
        /// Underlying service error
        source: ComputeError,
    },

    /// Edit service failed mid-stream for one file
    #[error("edit stream failed for {path}: {source}")]
    ComputationStream {
        /// File path
        path: String,
        /// Underlying service error
        source: ComputeError,
    },

    /// Replacements did not apply to the baseline
    #[error("failed to apply edit to {path}: {source}")]
    Apply {
        /// File path
        path: String,
        /// Underlying replacement error
        source: ReplacementError,
    },

    /// Build result could not be persisted
    #[error("failed to persist result for {path}: {source}")]
    Persist {
        /// File path
        path: String,
        /// Underlying store error
        source: StoreError,
    },

    /// Plan runtime actor is gone
    #[error("plan runtime closed")]
    RuntimeClosed,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl BuildError {
    /// Whether the error is scoped to a single file build
    ///
    /// Path-scoped errors never abort sibling paths or the plan.
    #[inline]
    #[must_use]
    pub fn is_per_path(&self) -> bool {
        matches!(
            self,
            Self::ComputationStart { .. }
                | Self::ComputationStream { .. }
                | Self::Apply { .. }
                | Self::Persist { .. }
        )
    }

    /// Whether rerunning the same build may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ComputationStart { source, .. } | Self::ComputationStream { source, .. } => {
                !matches!(source, ComputeError::Cancelled)
            }
            Self::Persist { .. } | Self::Apply { .. } => true,
            _ => false,
        }
    }

    /// Whether the plan context was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::ComputationStart {
                source: ComputeError::Cancelled,
                ..
            } | Self::ComputationStream {
                source: ComputeError::Cancelled,
                ..
            }
        )
    }
}
