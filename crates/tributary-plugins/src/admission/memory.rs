//! In-memory admission controller.
//!
//! Counters live in process memory, so a restart forgets in-flight work.
//! Plugins re-admit on their next round, which keeps the counters an upper
//! bound only within one process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;
use tributary_core::{ResourceConstraintsSpec, ResourceNamespace};

use super::{AdmissionController, AdmissionDecision, DenialReason};
use crate::config::PluginConfig;
use crate::error::{Error, Result};
use crate::metrics::PluginMetrics;

/// Quota key that applies to namespaces without their own entry.
pub const DEFAULT_QUOTA_KEY: &str = "default";

#[derive(Debug, Default)]
struct Counters {
    namespaces: HashMap<ResourceNamespace, u64>,
    projects: HashMap<String, u64>,
}

/// Process-local [`AdmissionController`].
///
/// Besides per-request constraints, optional per-namespace quotas (keyed by
/// namespace name, with [`DEFAULT_QUOTA_KEY`] as fallback) cap every
/// namespace. The effective namespace bound is the smaller of the two.
///
/// ## Example
///
/// ```rust
/// use tributary_core::{ResourceConstraintsSpec, ResourceNamespace};
/// use tributary_plugins::admission::memory::InMemoryAdmissionController;
/// use tributary_plugins::admission::AdmissionController;
///
/// # tokio_test::block_on(async {
/// let controller = InMemoryAdmissionController::new();
/// let ns = ResourceNamespace::new("proj", "etl").unwrap();
/// let decision = controller
///     .try_admit(&ns, &ResourceConstraintsSpec::new(Some(1), None))
///     .await
///     .unwrap();
/// assert!(decision.is_granted());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryAdmissionController {
    counters: RwLock<Counters>,
    quotas: BTreeMap<String, u64>,
    metrics: PluginMetrics,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("admission controller lock poisoned")
}

impl InMemoryAdmissionController {
    /// Creates a controller without namespace quotas.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a controller with per-namespace quotas.
    #[must_use]
    pub fn with_quotas(quotas: impl IntoIterator<Item = (String, u64)>) -> Self {
        Self {
            quotas: quotas.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Creates a controller with the quotas configured for a plugin.
    #[must_use]
    pub fn from_config(config: &PluginConfig) -> Self {
        Self::with_quotas(config.resource_quotas.clone())
    }

    fn quota_for(&self, namespace: &ResourceNamespace) -> Option<u64> {
        self.quotas
            .get(namespace.name())
            .or_else(|| self.quotas.get(DEFAULT_QUOTA_KEY))
            .copied()
    }

    fn namespace_limit(
        &self,
        namespace: &ResourceNamespace,
        constraints: &ResourceConstraintsSpec,
    ) -> Option<u64> {
        match (constraints.namespace_scope, self.quota_for(namespace)) {
            (Some(bound), Some(quota)) => Some(bound.min(quota)),
            (bound, quota) => bound.or(quota),
        }
    }
}

#[async_trait]
impl AdmissionController for InMemoryAdmissionController {
    async fn try_admit(
        &self,
        namespace: &ResourceNamespace,
        constraints: &ResourceConstraintsSpec,
    ) -> Result<AdmissionDecision> {
        let namespace_limit = self.namespace_limit(namespace, constraints);
        let mut counters = self.counters.write().map_err(poison_err)?;

        let ns_current = counters.namespaces.get(namespace).copied().unwrap_or(0);
        let project_current = counters
            .projects
            .get(namespace.project())
            .copied()
            .unwrap_or(0);

        let denial = if let Some(limit) = namespace_limit.filter(|limit| ns_current >= *limit) {
            Some(DenialReason::NamespaceLimit {
                current: ns_current,
                limit,
            })
        } else {
            constraints
                .project_scope
                .filter(|limit| project_current >= *limit)
                .map(|limit| DenialReason::ProjectLimit {
                    current: project_current,
                    limit,
                })
        };

        if let Some(reason) = denial {
            drop(counters);
            debug!(namespace = %namespace, %reason, "admission denied");
            self.metrics.record_admission(false);
            return Ok(AdmissionDecision::Denied { reason });
        }

        *counters.namespaces.entry(namespace.clone()).or_insert(0) += 1;
        *counters
            .projects
            .entry(namespace.project().to_string())
            .or_insert(0) += 1;
        drop(counters);

        self.metrics.record_admission(true);
        Ok(AdmissionDecision::Granted)
    }

    async fn release(&self, namespace: &ResourceNamespace) -> Result<()> {
        let mut counters = self.counters.write().map_err(poison_err)?;

        let Some(ns_count) = counters.namespaces.get_mut(namespace) else {
            return Ok(());
        };
        *ns_count = ns_count.saturating_sub(1);
        if *ns_count == 0 {
            counters.namespaces.remove(namespace);
        }

        if let Some(project_count) = counters.projects.get_mut(namespace.project()) {
            *project_count = project_count.saturating_sub(1);
            if *project_count == 0 {
                counters.projects.remove(namespace.project());
            }
        }
        drop(counters);
        Ok(())
    }

    async fn namespace_in_flight(&self, namespace: &ResourceNamespace) -> Result<u64> {
        let counters = self.counters.read().map_err(poison_err)?;
        Ok(counters.namespaces.get(namespace).copied().unwrap_or(0))
    }

    async fn project_in_flight(&self, project: &str) -> Result<u64> {
        let counters = self.counters.read().map_err(poison_err)?;
        Ok(counters.projects.get(project).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(project: &str, name: &str) -> ResourceNamespace {
        ResourceNamespace::new(project, name).unwrap()
    }

    #[tokio::test]
    async fn namespace_bound_denies_before_project_bound() -> Result<()> {
        let controller = InMemoryAdmissionController::new();
        let etl = ns("proj", "etl");
        let constraints = ResourceConstraintsSpec::new(Some(100), Some(50));

        for _ in 0..50 {
            assert!(controller.try_admit(&etl, &constraints).await?.is_granted());
        }
        let decision = controller.try_admit(&etl, &constraints).await?;
        assert_eq!(
            decision,
            AdmissionDecision::Denied {
                reason: DenialReason::NamespaceLimit {
                    current: 50,
                    limit: 50
                }
            }
        );
        assert_eq!(controller.project_in_flight("proj").await?, 50);
        Ok(())
    }

    #[tokio::test]
    async fn project_bound_spans_namespaces() -> Result<()> {
        let controller = InMemoryAdmissionController::new();
        let constraints = ResourceConstraintsSpec::new(Some(3), Some(2));

        assert!(controller.try_admit(&ns("p", "a"), &constraints).await?.is_granted());
        assert!(controller.try_admit(&ns("p", "a"), &constraints).await?.is_granted());
        assert!(controller.try_admit(&ns("p", "b"), &constraints).await?.is_granted());

        let decision = controller.try_admit(&ns("p", "b"), &constraints).await?;
        assert!(matches!(
            decision,
            AdmissionDecision::Denied {
                reason: DenialReason::ProjectLimit { current: 3, limit: 3 }
            }
        ));

        // Other projects are unaffected.
        assert!(controller.try_admit(&ns("q", "b"), &constraints).await?.is_granted());
        Ok(())
    }

    #[tokio::test]
    async fn unconfigured_bounds_are_unlimited() -> Result<()> {
        let controller = InMemoryAdmissionController::new();
        let free = ns("p", "free");
        for _ in 0..500 {
            assert!(controller
                .try_admit(&free, &ResourceConstraintsSpec::unlimited())
                .await?
                .is_granted());
        }
        assert_eq!(controller.namespace_in_flight(&free).await?, 500);
        Ok(())
    }

    #[tokio::test]
    async fn release_frees_capacity() -> Result<()> {
        let controller = InMemoryAdmissionController::new();
        let etl = ns("proj", "etl");
        let constraints = ResourceConstraintsSpec::new(None, Some(1));

        assert!(controller.try_admit(&etl, &constraints).await?.is_granted());
        assert!(!controller.try_admit(&etl, &constraints).await?.is_granted());

        controller.release(&etl).await?;
        assert_eq!(controller.namespace_in_flight(&etl).await?, 0);
        assert_eq!(controller.project_in_flight("proj").await?, 0);
        assert!(controller.try_admit(&etl, &constraints).await?.is_granted());
        Ok(())
    }

    #[tokio::test]
    async fn release_without_grant_is_noop() -> Result<()> {
        let controller = InMemoryAdmissionController::new();
        controller.release(&ns("proj", "etl")).await?;
        assert_eq!(controller.project_in_flight("proj").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn namespace_quotas_cap_with_default_fallback() -> Result<()> {
        let controller = InMemoryAdmissionController::with_quotas([
            ("default".to_string(), 2),
            ("etl".to_string(), 1),
        ]);
        let unbounded = ResourceConstraintsSpec::unlimited();

        let etl = ns("proj", "etl");
        assert!(controller.try_admit(&etl, &unbounded).await?.is_granted());
        assert!(!controller.try_admit(&etl, &unbounded).await?.is_granted());

        let other = ns("proj", "other");
        assert!(controller.try_admit(&other, &unbounded).await?.is_granted());
        assert!(controller.try_admit(&other, &unbounded).await?.is_granted());
        assert!(!controller.try_admit(&other, &unbounded).await?.is_granted());

        // The tighter of constraint and quota wins.
        let tight = ResourceConstraintsSpec::new(None, Some(1));
        let fresh = ns("proj", "fresh");
        assert!(controller.try_admit(&fresh, &tight).await?.is_granted());
        assert!(!controller.try_admit(&fresh, &tight).await?.is_granted());
        Ok(())
    }

    #[tokio::test]
    async fn configured_quotas_apply() -> Result<()> {
        let mut config = PluginConfig::default();
        config.resource_quotas = BTreeMap::from([(DEFAULT_QUOTA_KEY.to_string(), 1)]);
        let controller = InMemoryAdmissionController::from_config(&config);

        let etl = ns("proj", "etl");
        let unbounded = ResourceConstraintsSpec::unlimited();
        assert!(controller.try_admit(&etl, &unbounded).await?.is_granted());
        assert!(!controller.try_admit(&etl, &unbounded).await?.is_granted());
        Ok(())
    }
}
