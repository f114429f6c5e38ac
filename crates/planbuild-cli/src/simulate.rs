//! Scenario replay against the in-memory collaborators

use crate::scenario::Scenario;
use anyhow::Context;
use planbuild_core::{BuildConfig, BuildResult, PlanKey, StreamMessage};
use planbuild_runtime::{MemoryPlanStore, PlanBuilder, PlanRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Outcome of one simulated build
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Simulated plan
    pub plan: PlanKey,
    /// Path groups dispatched
    pub dispatched: usize,
    /// Every stream message, in arrival order
    pub messages: Vec<StreamMessage>,
    /// Persisted results, in write order
    pub results: Vec<BuildResult>,
    /// Paths still claimed when the wait ran out
    pub stalled: Vec<String>,
}

impl SimulationReport {
    /// Number of `BuildFailed` messages
    #[must_use]
    pub fn failures(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m, StreamMessage::BuildFailed { .. }))
            .count()
    }

    /// No failures and nothing stalled
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failures() == 0 && self.stalled.is_empty()
    }

    /// Latest persisted content of `path`
    #[must_use]
    pub fn final_content(&self, path: &str) -> Option<&str> {
        self.results
            .iter()
            .rev()
            .find(|r| r.path == path)
            .map(|r| r.content.as_str())
    }
}

/// Run `scenario` and wait up to `patience` for every file to finish
///
/// `on_message` sees each stream message as it arrives.
///
/// # Errors
/// Runtime or dispatch failures. Stalled paths are reported, not raised.
pub async fn simulate<F>(
    scenario: &Scenario,
    config: BuildConfig,
    patience: Duration,
    mut on_message: F,
) -> anyhow::Result<SimulationReport>
where
    F: FnMut(&StreamMessage),
{
    let store = Arc::new(MemoryPlanStore::new());
    let registry = Arc::new(PlanRegistry::new(config).context("invalid build configuration")?);
    let builder = PlanBuilder::new(
        Arc::clone(&registry),
        store.clone(),
        Arc::new(scenario.edit_service()),
    );

    let plan = scenario.plan_key();
    let runtime = registry.get_or_create(&plan);
    scenario
        .seed_runtime(&runtime)
        .await
        .context("seeding plan runtime")?;
    scenario.seed_store(&store, &plan);

    let mut messages = Vec::new();
    let mut rx = runtime.subscribe();
    let mut record = |msg: StreamMessage| {
        on_message(&msg);
        messages.push(msg);
    };

    let dispatched = builder
        .build(&plan, &scenario.auth())
        .await
        .context("dispatching builds")?;

    let idle = tokio::time::timeout(patience, runtime.wait_idle());
    tokio::pin!(idle);
    let waited = loop {
        tokio::select! {
            waited = &mut idle => break Some(waited.is_ok()),
            msg = rx.recv() => match msg {
                Ok(msg) => record(msg),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(plan = %plan, skipped, "stream lagged, messages dropped");
                }
                Err(RecvError::Closed) => break None,
            },
        }
    };
    let finished = match waited {
        Some(finished) => finished,
        None => idle.await.is_ok(),
    };
    while let Ok(msg) = rx.try_recv() {
        record(msg);
    }

    let stalled = if finished {
        Vec::new()
    } else {
        let paths = scenario.build_paths();
        runtime
            .update(move |state| {
                paths
                    .into_iter()
                    .filter(|p| state.is_building(p))
                    .collect::<Vec<_>>()
            })
            .await?
    };
    if !stalled.is_empty() {
        tracing::warn!(plan = %plan, ?stalled, "paths still claimed after wait");
    }

    registry.remove(&plan);
    Ok(SimulationReport {
        plan,
        dispatched,
        messages,
        results: store.results(),
        stalled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use planbuild_core::FailurePolicy;
    use pretty_assertions::assert_eq;

    const RENAME: &str = include_str!("../scenarios/rename.toml");

    #[tokio::test]
    async fn sample_scenario_runs_clean() {
        let scenario = Scenario::from_toml_str(RENAME).unwrap();
        let mut seen = 0;
        let report = simulate(&scenario, BuildConfig::default(), Duration::from_secs(5), |_| {
            seen += 1;
        })
        .await
        .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.dispatched, 3);
        assert_eq!(seen, report.messages.len());
        assert_eq!(report.results.len(), 4);
        assert_eq!(
            report.final_content("src/lib.rs"),
            Some("/// Entry point\npub fn new_name() {}\n")
        );
        assert_eq!(report.final_content("src/main.rs"), Some("fn main() {}\n"));
        assert_eq!(
            report.final_content("README.md"),
            Some("# Demo\n\nRun `planbuild simulate`.\n")
        );

        let finished = report.messages.iter().filter(|m| m.is_finished()).count();
        assert_eq!(finished, 4);
    }

    #[tokio::test]
    async fn unscripted_edit_is_reported() {
        let scenario = Scenario::from_toml_str(
            r#"
            [[files]]
            path = "a.rs"
            content = "fn a() {}"
            updated_at = "2024-01-01T10:00:00Z"

            [[builds]]
            path = "a.rs"
            description = "unscripted"
            "#,
        )
        .unwrap();

        let report = simulate(&scenario, BuildConfig::default(), Duration::from_secs(5), |_| {})
            .await
            .unwrap();
        assert_eq!(report.failures(), 1);
        assert!(report.stalled.is_empty());
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn stall_is_reported_after_wait() {
        let scenario = Scenario::from_toml_str(
            r#"
            [[files]]
            path = "a.rs"
            content = "fn a() {}"
            updated_at = "2024-01-01T10:00:00Z"

            [[builds]]
            path = "a.rs"
            description = "unscripted"
            "#,
        )
        .unwrap();
        let config = BuildConfig::default().with_failure_policy(FailurePolicy::Stall);

        let report = simulate(&scenario, config, Duration::from_millis(200), |_| {})
            .await
            .unwrap();
        assert_eq!(report.stalled, vec!["a.rs"]);
        assert!(!report.succeeded());
    }
}
