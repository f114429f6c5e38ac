//! Registry of live plan runtimes
//!
//! Maps a (plan, branch) pair to its [`PlanRuntime`]. Injected into the
//! builder rather than held as a global so tests can run isolated
//! registries side by side.

use crate::runtime::PlanRuntime;
use dashmap::DashMap;
use planbuild_core::{BuildConfig, BuildError, PlanKey};

/// Plan runtime registry
#[derive(Debug)]
pub struct PlanRegistry {
    config: BuildConfig,
    plans: DashMap<PlanKey, PlanRuntime>,
}

impl PlanRegistry {
    /// Create empty registry
    ///
    /// # Errors
    /// `BuildError::Config` if `config` fails validation
    pub fn new(config: BuildConfig) -> Result<Self, BuildError> {
        config.validate()?;
        Ok(Self {
            config,
            plans: DashMap::new(),
        })
    }

    /// Look up the runtime for `key`, spawning it on first reference
    #[must_use]
    pub fn get_or_create(&self, key: &PlanKey) -> PlanRuntime {
        self.plans
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(plan = %key, "creating plan runtime");
                PlanRuntime::spawn_validated(key.clone(), &self.config)
            })
            .clone()
    }

    /// Look up an existing runtime
    #[must_use]
    pub fn get(&self, key: &PlanKey) -> Option<PlanRuntime> {
        self.plans.get(key).map(|entry| entry.value().clone())
    }

    /// Tear down the runtime for `key`
    ///
    /// Cancels outstanding edit calls. Pipelines still holding a handle
    /// finish their current step and exit.
    pub fn remove(&self, key: &PlanKey) -> Option<PlanRuntime> {
        let (_, runtime) = self.plans.remove(key)?;
        runtime.cancel();
        Some(runtime)
    }

    /// Number of live runtimes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Whether no runtime is live
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Registry configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }
}

impl Default for PlanRegistry {
    fn default() -> Self {
        Self {
            config: BuildConfig::default(),
            plans: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planbuild_core::{ActiveBuild, PlanId};

    #[tokio::test]
    async fn same_key_same_runtime() {
        let registry = PlanRegistry::default();
        let key = PlanKey::new(PlanId::new(), "main");

        let a = registry.get_or_create(&key);
        a.enqueue(ActiveBuild::new("a.rs", "", "")).await.unwrap();

        let b = registry.get_or_create(&key);
        assert_eq!(b.active_pipelines(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn branches_are_isolated() {
        let registry = PlanRegistry::default();
        let plan = PlanId::new();

        let main = registry.get_or_create(&PlanKey::new(plan, "main"));
        main.enqueue(ActiveBuild::new("a.rs", "", "")).await.unwrap();

        let feature = registry.get_or_create(&PlanKey::new(plan, "feature"));
        assert_eq!(feature.active_pipelines(), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = PlanRegistry::new(BuildConfig::new().with_stream_capacity(0)).unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));

        let err = PlanRegistry::new(BuildConfig::new().with_mailbox_capacity(0)).unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
    }

    #[tokio::test]
    async fn validated_config_spawns_runtimes() {
        let registry = PlanRegistry::new(BuildConfig::new().with_stream_capacity(1)).unwrap();
        let runtime = registry.get_or_create(&PlanKey::new(PlanId::new(), "main"));
        assert_eq!(runtime.active_pipelines(), 0);
    }

    #[tokio::test]
    async fn remove_cancels() {
        let registry = PlanRegistry::default();
        let key = PlanKey::new(PlanId::new(), "main");
        let runtime = registry.get_or_create(&key);

        let removed = registry.remove(&key).unwrap();
        assert!(runtime.cancel_token().is_cancelled());
        assert_eq!(removed.key(), &key);
        assert!(registry.get(&key).is_none());
        assert!(registry.is_empty());
    }
}
