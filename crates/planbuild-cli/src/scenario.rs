//! Scenario files
//!
//! A scenario describes one plan: committed files, context snapshots and
//! the pending builds to run, each optionally scripted with the
//! replacements the edit service should answer with. Timestamps are
//! RFC 3339 strings.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use planbuild_core::{ActiveBuild, Auth, BuildError, ContextSnapshot, PlanId, PlanKey, Replacement};
use planbuild_runtime::{MemoryPlanStore, PlanRuntime, StaticEditService};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Committed file version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    /// File path
    pub path: String,
    /// Committed content
    pub content: String,
    /// Commit time
    pub updated_at: DateTime<Utc>,
}

/// Context snapshot loaded before the build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioSnapshot {
    /// File path
    pub path: String,
    /// Snapshot content
    pub body: String,
    /// Snapshot time
    pub updated_at: DateTime<Utc>,
}

/// Pending build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioBuild {
    /// File path
    pub path: String,
    /// Edit instruction
    pub description: String,
    /// Candidate content
    #[serde(default)]
    pub content: String,
    /// Originating conversation message
    #[serde(default)]
    pub convo_message_id: Option<String>,
    /// Edit service answer; unscripted edits fail to start
    #[serde(default)]
    pub replacements: Option<Vec<Replacement>>,
}

/// One plan to simulate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    /// Plan branch
    pub branch: String,
    /// Organization running the build
    pub org_id: String,
    /// User running the build
    pub user_id: String,
    /// Edit service delta size in characters
    pub chunk_size: usize,
    /// Committed file versions
    pub files: Vec<ScenarioFile>,
    /// Context snapshots
    pub snapshots: Vec<ScenarioSnapshot>,
    /// Pending builds, in submission order
    pub builds: Vec<ScenarioBuild>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            branch: "main".into(),
            org_id: "org".into(),
            user_id: "user".into(),
            chunk_size: 16,
            files: Vec::new(),
            snapshots: Vec::new(),
            builds: Vec::new(),
        }
    }
}

impl Scenario {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Malformed TOML or a failed [`Scenario::validate`]
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let scenario: Self = toml::from_str(s).context("invalid scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Unreadable file or invalid scenario
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("loading {}", path.display()))
    }

    /// Check for empty paths, duplicate committed files and duplicate snapshots
    ///
    /// # Errors
    /// The first problem found
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.branch.is_empty() {
            bail!("branch must not be empty");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if let Some(build) = self.builds.iter().find(|b| b.path.is_empty()) {
            bail!("build {:?} has no path", build.description);
        }

        let mut seen = HashSet::new();
        for file in &self.files {
            if !seen.insert(file.path.as_str()) {
                bail!("file {} committed twice", file.path);
            }
        }
        seen.clear();
        for snapshot in &self.snapshots {
            if !seen.insert(snapshot.path.as_str()) {
                bail!("snapshot for {} given twice", snapshot.path);
            }
        }
        Ok(())
    }

    /// Fresh plan key on this scenario's branch
    #[must_use]
    pub fn plan_key(&self) -> PlanKey {
        PlanKey::new(PlanId::new(), self.branch.clone())
    }

    /// Credentials of the simulated build
    #[must_use]
    pub fn auth(&self) -> Auth {
        Auth::new(self.org_id.clone(), self.user_id.clone())
    }

    /// Edit service answering with the scripted replacements
    #[must_use]
    pub fn edit_service(&self) -> StaticEditService {
        self.builds
            .iter()
            .filter_map(|b| b.replacements.as_ref().map(|r| (b, r)))
            .fold(
                StaticEditService::new().with_chunk_size(self.chunk_size),
                |service, (build, replacements)| {
                    service.with_replacements(&build.path, &build.description, replacements.clone())
                },
            )
    }

    /// Queue every build as pending for `plan`
    pub fn seed_store(&self, store: &MemoryPlanStore, plan: &PlanKey) {
        for build in &self.builds {
            let mut active = ActiveBuild::new(&build.path, &build.description, &build.content);
            if let Some(id) = &build.convo_message_id {
                active = active.with_convo_message(id);
            }
            store.add_pending(plan, active);
        }
    }

    /// Load committed files and snapshots into the plan runtime
    ///
    /// # Errors
    /// `BuildError::RuntimeClosed` if the runtime is gone
    pub async fn seed_runtime(&self, runtime: &PlanRuntime) -> Result<(), BuildError> {
        for file in &self.files {
            runtime
                .commit_file(&file.path, &file.content, file.updated_at)
                .await?;
        }
        for snapshot in &self.snapshots {
            runtime
                .set_context(
                    &snapshot.path,
                    ContextSnapshot::new(&snapshot.body, snapshot.updated_at),
                )
                .await?;
        }
        Ok(())
    }

    /// Distinct build paths, in first-seen order
    #[must_use]
    pub fn build_paths(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.builds
            .iter()
            .filter(|b| seen.insert(b.path.as_str()))
            .map(|b| b.path.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planbuild_core::PlanStore;
    use pretty_assertions::assert_eq;

    const RENAME: &str = include_str!("../scenarios/rename.toml");

    #[test]
    fn sample_scenario_parses() {
        let scenario = Scenario::from_toml_str(RENAME).unwrap();
        assert_eq!(scenario.org_id, "org-demo");
        assert_eq!(scenario.chunk_size, 12);
        assert_eq!(scenario.files.len(), 1);
        assert_eq!(scenario.snapshots.len(), 2);
        assert_eq!(scenario.builds.len(), 4);
        assert_eq!(
            scenario.build_paths(),
            vec!["src/lib.rs", "src/main.rs", "README.md"]
        );
        assert!(scenario.builds[2].replacements.is_none());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let scenario = Scenario::from_toml_str(
            r#"
            [[builds]]
            path = "a.rs"
            description = "create"
            content = "x"
            "#,
        )
        .unwrap();
        assert_eq!(scenario.branch, "main");
        assert_eq!(scenario.chunk_size, 16);
        assert!(scenario.builds[0].convo_message_id.is_none());
    }

    #[test]
    fn rejects_duplicate_files() {
        let err = Scenario::from_toml_str(
            r#"
            [[files]]
            path = "a.rs"
            content = "1"
            updated_at = "2024-01-01T10:00:00Z"

            [[files]]
            path = "a.rs"
            content = "2"
            updated_at = "2024-01-01T11:00:00Z"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("committed twice"));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(Scenario::from_toml_str("brnach = \"main\"").is_err());
    }

    #[test]
    fn from_path_reports_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = Scenario::from_path(&path).unwrap_err();
        assert!(format!("{err:#}").contains("missing.toml"));
    }

    #[tokio::test]
    async fn seeds_store_in_submission_order() {
        let scenario = Scenario::from_toml_str(RENAME).unwrap();
        let store = MemoryPlanStore::new();
        let plan = scenario.plan_key();
        scenario.seed_store(&store, &plan);

        let pending = store.load_pending_builds(&plan).await.unwrap();
        let descriptions: Vec<_> = pending["src/lib.rs"]
            .iter()
            .map(|b| b.file_description.as_str())
            .collect();
        assert_eq!(descriptions, vec!["rename function", "document function"]);
        assert_eq!(pending.keys().collect::<Vec<_>>(), vec!["src/lib.rs", "src/main.rs", "README.md"]);
    }
}
