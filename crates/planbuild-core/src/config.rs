//! Build coordinator configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! stream_capacity = 1024
//! mailbox_capacity = 256
//!
//! [failure_policy]
//! kind = "retry"
//! max_attempts = 3
//! ```

use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What happens to a path when one of its builds fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep the path marked as building; later edits wait for intervention
    Stall,
    /// Report the failure and continue with the next queued edit
    SkipAndRelease,
    /// Rerun the failed edit, then skip once attempts run out
    Retry {
        /// Total attempts per edit, including the first
        max_attempts: u32,
    },
}

impl FailurePolicy {
    /// Total attempts allowed for a single build
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Retry { max_attempts } => *max_attempts,
            Self::Stall | Self::SkipAndRelease => 1,
        }
    }

    /// Whether a failed build holds the path
    #[inline]
    #[must_use]
    pub fn stalls(&self) -> bool {
        matches!(self, Self::Stall)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::SkipAndRelease
    }
}

/// Build coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Per-path failure handling
    pub failure_policy: FailurePolicy,
    /// Capacity of each plan's outbound progress channel
    pub stream_capacity: usize,
    /// Capacity of each plan runtime's command mailbox
    pub mailbox_capacity: usize,
}

impl BuildConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With failure policy
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// With outbound stream capacity
    #[inline]
    #[must_use]
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    /// With command mailbox capacity
    #[inline]
    #[must_use]
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// `BuildError::Config` if the document is malformed or invalid
    pub fn from_toml_str(s: &str) -> Result<Self, BuildError> {
        let config: Self = toml::from_str(s).map_err(|e| BuildError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `BuildError::Config` if the file cannot be read or is invalid
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, BuildError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BuildError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Check invariants
    ///
    /// # Errors
    /// `BuildError::Config` on zero capacities or zero retry attempts
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.stream_capacity == 0 {
            return Err(BuildError::Config("stream_capacity must be > 0".into()));
        }
        if self.mailbox_capacity == 0 {
            return Err(BuildError::Config("mailbox_capacity must be > 0".into()));
        }
        if self.failure_policy.max_attempts() == 0 {
            return Err(BuildError::Config("max_attempts must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            stream_capacity: 1024,
            mailbox_capacity: 256,
        }
    }
}
