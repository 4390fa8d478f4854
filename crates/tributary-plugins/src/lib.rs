//! # tributary-plugins
//!
//! Execution machinery for plugins that drive work in external systems.
//!
//! This crate provides:
//!
//! - **Array Reconciliation**: Folding the states of N child jobs into one
//!   parent phase with minimum-success semantics and bounded error text
//! - **Job State Cache**: LRU-bounded caches refreshed in the background by a
//!   bounded worker pool, with a per-entry circuit breaker
//! - **Admission Control**: Project and namespace scoped in-flight limits, plus
//!   token-bucket limiting of external reads and writes
//! - **Plugin Runtime**: A registry of [`plugin::AsyncPlugin`]s and the
//!   lifecycle driver around each one
//!
//! ## Rounds
//!
//! Callers invoke reconciliation and status checks in rounds. A round reads
//! only cached state, never blocks on an external system and returns a
//! replacement state that the caller persists. All external traffic happens
//! in the background refresh loops, behind the rate limiters.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tributary_plugins::array::links::BatchConsoleLinks;
//! use tributary_plugins::array::reconcile::ArrayReconciler;
//! use tributary_plugins::array::ParentAggregateState;
//! use tributary_plugins::cache::job_store::{JobStore, SubJobStatus};
//! use tributary_plugins::config::{ArrayConfig, CachingConfig};
//! use tributary_core::Phase;
//! # use tributary_plugins::cache::{SyncError, SyncFunc};
//! # use tributary_plugins::cache::job_store::{JobRecord, SubJob};
//! # use tokio_util::sync::CancellationToken;
//! # struct Idle;
//! # #[async_trait::async_trait]
//! # impl SyncFunc<JobRecord> for Idle {
//! #     async fn sync(&self, _: &str, _: &JobRecord, _: &CancellationToken)
//! #         -> Result<Vec<SubJob>, SyncError> { Ok(Vec::new()) }
//! # }
//!
//! # fn main() -> tributary_plugins::error::Result<()> {
//! let store = JobStore::new(CachingConfig::default(), Arc::new(Idle))?;
//! let reconciler = ArrayReconciler::new(
//!     ArrayConfig::default(),
//!     Arc::new(BatchConsoleLinks::new("us-east-1")),
//! );
//!
//! // First round registers the job record.
//! let state = ParentAggregateState::uncached("batch-job-1", 2, 2);
//! let round = reconciler.reconcile(&store, "exec-1", "node-a", &state)?;
//! assert!(round.registered);
//!
//! store.update_sub_job("exec-1", 0, SubJobStatus::new(Phase::Success))?;
//! store.update_sub_job("exec-1", 1, SubJobStatus::new(Phase::Success))?;
//! let round = reconciler.reconcile(&store, "exec-1", "node-a", &round.state)?;
//! assert_eq!(round.state.phase.to_phase(), Phase::Success);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod array;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod plugin;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::admission::memory::InMemoryAdmissionController;
    pub use crate::admission::rate_limit::{ExternalCallLimiter, ExternalCallLimiters};
    pub use crate::admission::{AdmissionController, AdmissionDecision, DenialReason};
    pub use crate::array::error_collector::ErrorCollector;
    pub use crate::array::launcher::ArrayJobLauncher;
    pub use crate::array::links::{BatchConsoleLinks, LogLinkFormatter};
    pub use crate::array::reconcile::{ArrayReconciler, Reconciliation};
    pub use crate::array::{AggregatePhase, ParentAggregateState};
    pub use crate::cache::job_store::{BatchClient, JobRecord, JobStore, SubJobStatus};
    pub use crate::cache::{AutoRefreshCache, SyncError, SyncFunc, SyncHealth};
    pub use crate::config::{CachingConfig, PluginConfig, RateLimiterConfig};
    pub use crate::error::{Error, Result};
    pub use crate::metrics::PluginMetrics;
    pub use crate::plugin::registry::PluginRegistry;
    pub use crate::plugin::runtime::{PluginRuntime, ResourceState};
    pub use crate::plugin::{AsyncPlugin, Resource, ResourceMeta, TaskExecutionContext};
}
