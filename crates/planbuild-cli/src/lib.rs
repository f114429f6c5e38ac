//! planbuild scenario runner
//!
//! Replays a plan described in TOML through the build coordinator using the
//! in-memory store and a scripted edit service.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod scenario;
pub mod simulate;

pub use scenario::{Scenario, ScenarioBuild, ScenarioFile, ScenarioSnapshot};
pub use simulate::{simulate, SimulationReport};

use planbuild_core::FailurePolicy;

/// Failure policy from its command-line name
///
/// Returns `None` for an unknown name.
#[must_use]
pub fn parse_policy(name: &str, max_attempts: u32) -> Option<FailurePolicy> {
    match name {
        "stall" => Some(FailurePolicy::Stall),
        "skip" => Some(FailurePolicy::SkipAndRelease),
        "retry" => Some(FailurePolicy::Retry { max_attempts }),
        _ => None,
    }
}
