//! Plugins for external resources.
//!
//! This module provides:
//!
//! - [`AsyncPlugin`]: The contract for a plugin that creates a resource in an
//!   external system and polls it to completion
//! - [`TaskExecutionContext`]: What a plugin knows about the execution
//! - [`registry::PluginRegistry`]: Task type to plugin resolution
//! - [`runtime::PluginRuntime`]: Admission, rate limiting and caching around
//!   one plugin
//! - [`classify`]: Outcome classification for warehouse jobs
//! - [`service::ServiceClient`]: Contract for command-style backends
//!
//! ## Design Principles
//!
//! - **Opaque payloads**: Plugins exchange JSON values with the runtime, so
//!   resources persist between rounds without the runtime knowing their shape
//! - **No blocking in status**: Only `create`, `get` and `delete` talk to the
//!   external system; `status` is a pure function of the cached resource

pub mod classify;
pub mod registry;
pub mod runtime;
pub mod service;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tributary_core::{PhaseInfo, ResourceConstraintsSpec, ResourceNamespace};

use crate::config::PluginConfig;
use crate::error::{Error, Result};

/// What a plugin knows about the execution it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionContext {
    /// Generated execution name, unique per attempt. Used as cache key and
    /// as the external job name.
    pub execution_id: String,
    /// Owner of the execution (e.g. the workflow node).
    pub owner: String,
    /// Task type used to resolve the plugin.
    pub task_type: String,
    /// Namespace the execution runs in.
    pub namespace: ResourceNamespace,
    /// Labels to attach to external resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Plugin-specific task definition.
    #[serde(default)]
    pub custom: serde_json::Value,
}

impl TaskExecutionContext {
    /// Creates a context with no labels and an empty task definition.
    #[must_use]
    pub fn new(
        execution_id: impl Into<String>,
        task_type: impl Into<String>,
        namespace: ResourceNamespace,
    ) -> Self {
        let execution_id = execution_id.into();
        Self {
            owner: execution_id.clone(),
            execution_id,
            task_type: task_type.into(),
            namespace,
            labels: BTreeMap::new(),
            custom: serde_json::Value::Null,
        }
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the plugin-specific task definition.
    #[must_use]
    pub fn with_custom(mut self, custom: serde_json::Value) -> Self {
        self.custom = custom;
        self
    }
}

/// Handle a plugin needs to find its external resource again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceMeta(pub serde_json::Value);

/// Last observed state of an external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(pub serde_json::Value);

impl ResourceMeta {
    /// Wraps a serializable handle.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(value).map_err(|e| {
            Error::system(format!("failed to encode resource meta: {e}"))
        })?))
    }

    /// Reads the handle back as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not match `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone()).map_err(|e| {
            Error::system(format!("failed to decode resource meta: {e}"))
        })
    }
}

impl Resource {
    /// Wraps a serializable resource state.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(value).map_err(|e| {
            Error::system(format!("failed to encode resource: {e}"))
        })?))
    }

    /// Reads the resource state back as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not match `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| Error::system(format!("failed to decode resource: {e}")))
    }
}

/// A plugin that drives one external resource per execution.
///
/// Implementations must be idempotent in `create` for a given execution id:
/// a retried launch may call it again after a crash.
#[async_trait]
pub trait AsyncPlugin: Send + Sync {
    /// Unique plugin id.
    fn id(&self) -> &str;

    /// Task types this plugin serves.
    fn task_types(&self) -> Vec<String>;

    /// Settings for admission, rate limits and caching.
    fn config(&self) -> &PluginConfig;

    /// Namespace and constraints to admit the execution under.
    ///
    /// Defaults to the execution's namespace and the configured constraints.
    async fn resource_requirements(
        &self,
        ctx: &TaskExecutionContext,
    ) -> Result<(ResourceNamespace, ResourceConstraintsSpec)> {
        Ok((ctx.namespace.clone(), self.config().resource_constraints))
    }

    /// Creates the external resource.
    ///
    /// May return the initial resource state if the create call reports it.
    async fn create(&self, ctx: &TaskExecutionContext) -> Result<(ResourceMeta, Option<Resource>)>;

    /// Fetches the current resource state.
    async fn get(&self, ctx: &TaskExecutionContext, meta: &ResourceMeta) -> Result<Resource>;

    /// Deletes or cancels the external resource.
    async fn delete(&self, ctx: &TaskExecutionContext, meta: &ResourceMeta) -> Result<()>;

    /// Maps the last observed state to a phase.
    ///
    /// `resource` is `None` until the first state is observed.
    fn status(
        &self,
        ctx: &TaskExecutionContext,
        meta: &ResourceMeta,
        resource: Option<&Resource>,
    ) -> Result<PhaseInfo>;
}
