//! Lifecycle driver for one [`AsyncPlugin`].
//!
//! The runtime owns everything around the plugin's external calls:
//!
//! - admission before creation, release after deletion
//! - separate read and write rate limiters
//! - an [`AutoRefreshCache`] of resources, refreshed in the background
//!   through the plugin's `get`
//!
//! Between rounds the caller persists only the [`ResourceState`] returned by
//! [`PluginRuntime::launch`]. After a restart the cache is empty; the next
//! [`PluginRuntime::check`] re-registers the resource from that state.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use tributary_core::observability::plugin_span;
use tributary_core::{ExecutionError, FailureKind, Phase, PhaseInfo, ResourceNamespace};

use super::{AsyncPlugin, Resource, ResourceMeta, TaskExecutionContext};
use crate::admission::rate_limit::{ExternalCallLimiter, ExternalCallLimiters};
use crate::admission::{AdmissionController, AdmissionDecision};
use crate::cache::{AutoRefreshCache, Refreshable, SyncError, SyncFunc, SyncHealth};
use crate::error::Result;

/// Reason code reported when the resource cache gave up on an entry.
pub const RESOURCE_SYNC_FAILED: &str = "ResourceSyncFailed";

/// Reason code reported when a created resource's status could not be read.
pub const RESOURCE_STATUS_FAILED: &str = "ResourceStatusFailed";

/// What the runtime needs to find an execution's resource again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    /// Namespace the execution was admitted under.
    pub namespace: ResourceNamespace,
    /// The plugin's resource handle.
    pub meta: ResourceMeta,
}

/// Result of a launch attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Launch {
    /// Set once the resource exists; persist it for later rounds.
    pub state: Option<ResourceState>,
    /// Phase to report for this round.
    pub phase_info: PhaseInfo,
}

/// Cached view of one execution's resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResource {
    /// The execution the resource serves.
    pub ctx: TaskExecutionContext,
    /// The plugin's resource handle.
    pub meta: ResourceMeta,
    /// Last observed state, `None` until first observed.
    pub resource: Option<Resource>,
}

impl Refreshable for CachedResource {
    type Update = Resource;

    fn merge(&mut self, update: Resource) {
        self.resource = Some(update);
    }
}

/// Refreshes cached resources through the plugin's `get`.
struct ResourcePoller {
    plugin: Arc<dyn AsyncPlugin>,
    limiter: Arc<ExternalCallLimiter>,
}

#[async_trait]
impl SyncFunc<CachedResource> for ResourcePoller {
    async fn sync(
        &self,
        key: &str,
        current: &CachedResource,
        cancel: &CancellationToken,
    ) -> std::result::Result<Resource, SyncError> {
        self.limiter.acquire(cancel).await?;
        let resource = self
            .plugin
            .get(&current.ctx, &current.meta)
            .instrument(plugin_span("get", self.plugin.id(), key))
            .await?;
        Ok(resource)
    }
}

/// Drives executions of one plugin.
pub struct PluginRuntime {
    plugin: Arc<dyn AsyncPlugin>,
    admission: Arc<dyn AdmissionController>,
    write_limiter: Arc<ExternalCallLimiter>,
    cache: Arc<AutoRefreshCache<CachedResource>>,
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("plugin", &self.plugin.id())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl PluginRuntime {
    /// Wires `plugin` to an admission controller using the plugin's config.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin's caching configuration is invalid.
    pub fn new(
        plugin: Arc<dyn AsyncPlugin>,
        admission: Arc<dyn AdmissionController>,
    ) -> Result<Self> {
        let config = plugin.config();
        config.validate()?;
        let ExternalCallLimiters { read, write } = ExternalCallLimiters::from_config(config);

        let poller = ResourcePoller {
            plugin: Arc::clone(&plugin),
            limiter: Arc::new(read),
        };
        let cache = AutoRefreshCache::new(
            format!("{}-resources", plugin.id()),
            config.caching.clone(),
            Arc::new(poller),
        )?;

        Ok(Self {
            plugin,
            admission,
            write_limiter: Arc::new(write),
            cache: Arc::new(cache),
        })
    }

    /// The wrapped plugin.
    #[must_use]
    pub fn plugin(&self) -> &Arc<dyn AsyncPlugin> {
        &self.plugin
    }

    /// The resource cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<AutoRefreshCache<CachedResource>> {
        &self.cache
    }

    /// Starts background refresh of cached resources.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.cache).start(cancel)
    }

    /// Admits and creates the execution's resource.
    ///
    /// A denied admission is not an error: the returned phase is
    /// `WaitingForResources` and the caller should launch again later.
    ///
    /// Once the resource exists the returned launch always carries its
    /// [`ResourceState`], so the caller can finalize it. A status that cannot
    /// be read is reported as a failed phase.
    ///
    /// # Errors
    ///
    /// Returns an error if admission, the write limiter or creation fails.
    /// Any admission granted by this call is released first.
    pub async fn launch(
        &self,
        ctx: &TaskExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Launch> {
        let span = plugin_span("launch", self.plugin.id(), &ctx.execution_id);
        self.admit_and_create(ctx, cancel).instrument(span).await
    }

    async fn admit_and_create(
        &self,
        ctx: &TaskExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Launch> {
        let (namespace, constraints) = self.plugin.resource_requirements(ctx).await?;

        if let AdmissionDecision::Denied { reason } =
            self.admission.try_admit(&namespace, &constraints).await?
        {
            debug!(namespace = %namespace, %reason, "waiting for resources");
            return Ok(Launch {
                state: None,
                phase_info: PhaseInfo::waiting_for_resources(reason.to_string()),
            });
        }

        let (meta, resource) = match self.create(ctx, cancel).await {
            Ok(created) => created,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "create failed, releasing admission");
                self.admission.release(&namespace).await?;
                return Err(e);
            }
        };

        let phase_info = self.track(ctx, &meta, resource).unwrap_or_else(|e| {
            warn!(error = %e, "status of created resource unavailable");
            let (phase, err) = match e.failure_kind() {
                FailureKind::User => (
                    Phase::PermanentFailure,
                    ExecutionError::user(RESOURCE_STATUS_FAILED, e.to_string()),
                ),
                FailureKind::System => (
                    Phase::RetryableFailure,
                    ExecutionError::system(RESOURCE_STATUS_FAILED, e.to_string()),
                ),
            };
            PhaseInfo::failed(phase, err, None)
        });

        info!(phase = %phase_info.phase, "resource created");
        Ok(Launch {
            state: Some(ResourceState { namespace, meta }),
            phase_info,
        })
    }

    /// Caches a freshly created resource and reads its initial phase.
    fn track(
        &self,
        ctx: &TaskExecutionContext,
        meta: &ResourceMeta,
        resource: Option<Resource>,
    ) -> Result<PhaseInfo> {
        let (entry, _) = self.cache.get_or_create(&ctx.execution_id, || CachedResource {
            ctx: ctx.clone(),
            meta: meta.clone(),
            resource,
        })?;
        match entry.value.resource.as_ref() {
            Some(resource) => self.plugin.status(ctx, &entry.value.meta, Some(resource)),
            None => Ok(PhaseInfo::queued(None)),
        }
    }

    async fn create(
        &self,
        ctx: &TaskExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(ResourceMeta, Option<Resource>)> {
        self.write_limiter.acquire(cancel).await?;
        self.plugin.create(ctx).await
    }

    /// Reports the phase of a launched execution from the cache.
    ///
    /// Registers the resource if the cache does not hold it (after a
    /// restart or eviction). Never calls the external system.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unavailable or the plugin cannot
    /// interpret the cached resource.
    pub fn check(&self, ctx: &TaskExecutionContext, state: &ResourceState) -> Result<PhaseInfo> {
        let span = plugin_span("check", self.plugin.id(), &ctx.execution_id);
        let _enter = span.enter();

        let (entry, registered) = self.cache.get_or_create(&ctx.execution_id, || CachedResource {
            ctx: ctx.clone(),
            meta: state.meta.clone(),
            resource: None,
        })?;
        if registered {
            info!("resource missing from cache, re-registered");
        }

        match &entry.health {
            SyncHealth::Failed { kind, message } => {
                let err = match kind {
                    FailureKind::User => ExecutionError::user(RESOURCE_SYNC_FAILED, message.clone()),
                    FailureKind::System => {
                        ExecutionError::system(RESOURCE_SYNC_FAILED, message.clone())
                    }
                };
                Ok(PhaseInfo::failed(Phase::PermanentFailure, err, None))
            }
            SyncHealth::Healthy | SyncHealth::Degraded { .. } => {
                self.plugin
                    .status(ctx, &entry.value.meta, entry.value.resource.as_ref())
            }
        }
    }

    /// Deletes the resource and releases its admission.
    ///
    /// # Errors
    ///
    /// Returns an error if the write limiter wait is cancelled or deletion
    /// fails; the admission is kept so a later finalize can retry.
    pub async fn finalize(
        &self,
        ctx: &TaskExecutionContext,
        state: &ResourceState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let span = plugin_span("finalize", self.plugin.id(), &ctx.execution_id);
        self.delete_and_release(ctx, state, cancel)
            .instrument(span)
            .await
    }

    async fn delete_and_release(
        &self,
        ctx: &TaskExecutionContext,
        state: &ResourceState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.write_limiter.acquire(cancel).await?;
        self.plugin.delete(ctx, &state.meta).await?;
        self.cache.evict(&ctx.execution_id)?;
        self.admission.release(&state.namespace).await?;
        info!(namespace = %state.namespace, "resource finalized");
        Ok(())
    }
}
