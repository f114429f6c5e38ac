//! planbuild core
//!
//! Domain model for coordinating per-file builds within a plan:
//! - Plan, build and stream message types
//! - Error taxonomy shared by the runtime
//! - Configuration (failure policy, channel capacities)
//! - Collaborator contracts (`PlanStore`, `EditService`)
//! - Baseline resolution and replacement application
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use planbuild_core::{resolve_baseline, BaselineSource, ContextSnapshot, CurrentPlanFiles};
//!
//! let mut files = CurrentPlanFiles::new();
//! files.commit("src/lib.rs", "committed", Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
//! let snapshot = ContextSnapshot::new("snapshot", Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
//!
//! let baseline = resolve_baseline("src/lib.rs", &files, Some(&snapshot));
//! assert_eq!(baseline.source, BaselineSource::Committed);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod api;
pub mod baseline;
pub mod config;
pub mod error;
pub mod replace;
pub mod types;

// Re-exports for convenience
pub use api::{EditChunk, EditRequest, EditService, EditStream, PlanStore};
pub use baseline::{resolve_baseline, Baseline, BaselineSource};
pub use config::{BuildConfig, FailurePolicy};
pub use error::{BuildError, ComputeError, ReplacementError, StoreError};
pub use replace::apply_replacements;
pub use types::{
    ActiveBuild, Auth, BuildId, BuildInfo, BuildResult, CommittedFile, ContextSnapshot,
    CurrentPlanFiles, PendingBuildsByPath, PlanId, PlanKey, PlanStatus, Replacement,
    StreamMessage,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
