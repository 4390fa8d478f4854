//! Array reconciliation.
//!
//! A round reads the job record for one execution and folds its children's
//! phases into a new [`ParentAggregateState`]. Rounds perform no I/O and never
//! retry; a missing record is re-registered and the prior state returned.

use std::sync::Arc;

use tracing::{debug, info};
use tributary_core::observability::reconcile_span;
use tributary_core::{
    ArraySummary, CompactedStatusArray, Phase, PhaseVersion, TaskLog, DEFAULT_PHASE_VERSION,
};

use super::error_collector::{truncate, ErrorCollector};
use super::links::LogLinkFormatter;
use super::{AggregatePhase, ParentAggregateState};
use crate::cache::job_store::{JobRecord, JobStore};
use crate::cache::SyncHealth;
use crate::config::ArrayConfig;
use crate::error::{Error, Result};
use crate::metrics::{time_reconcile_round, PluginMetrics};

/// Outcome of one reconciliation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The replacement state.
    pub state: ParentAggregateState,
    /// Log links for children that were inspected this round.
    pub logs: Vec<TaskLog>,
    /// True if the round registered a missing job record.
    pub registered: bool,
}

/// Folds child phases into the parent's phase.
///
/// `needed` is the number of successes still required from the `size`
/// executed children.
#[must_use]
pub fn summary_to_phase(summary: &ArraySummary, needed: u64, size: u64) -> AggregatePhase {
    if summary.successes() >= needed {
        return AggregatePhase::Success;
    }
    let can_still_succeed = size.saturating_sub(summary.count(Phase::PermanentFailure));
    if can_still_succeed < needed {
        return AggregatePhase::PermanentFailure;
    }
    if summary.count(Phase::RetryableFailure) > 0 {
        return AggregatePhase::RetryableFailure;
    }
    AggregatePhase::CheckingSubTasks
}

/// Change fingerprint of a summary: the sum of `code * count`.
///
/// Distinct distributions can share a value.
#[must_use]
pub fn summary_version(summary: &ArraySummary) -> PhaseVersion {
    summary.iter().fold(0u32, |version, (phase, count)| {
        // Wrap like the persisted 32-bit counter.
        #[allow(clippy::cast_possible_truncation)]
        let count = count as u32;
        version.wrapping_add(u32::from(phase.code()).wrapping_mul(count))
    })
}

/// Reconciles array tasks against a [`JobStore`].
pub struct ArrayReconciler {
    config: ArrayConfig,
    links: Arc<dyn LogLinkFormatter>,
    metrics: PluginMetrics,
}

impl std::fmt::Debug for ArrayReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayReconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ArrayReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(config: ArrayConfig, links: Arc<dyn LogLinkFormatter>) -> Self {
        Self {
            config,
            links,
            metrics: PluginMetrics::new(),
        }
    }

    /// Runs one round for the execution named `key`, owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error if `prior` is inconsistent, exceeds the configured
    /// maximum array size, has no external job id when one is needed, or the
    /// job store is unavailable.
    pub fn reconcile(
        &self,
        store: &JobStore,
        key: &str,
        owner: &str,
        prior: &ParentAggregateState,
    ) -> Result<Reconciliation> {
        let size = prior.execution_size();
        let span = reconcile_span(key, size);
        let _enter = span.enter();
        let _timer = time_reconcile_round();

        prior.validate()?;
        if size > self.config.max_array_size {
            return Err(Error::invalid_state(format!(
                "array size {size} exceeds the maximum of {}",
                self.config.max_array_size
            )));
        }

        let Some(entry) = store.get(key)? else {
            let job_id = prior
                .external_job_id
                .clone()
                .ok_or_else(|| Error::invalid_state("array job has no external job id"))?;
            let (_, registered) =
                store.get_or_create(key, || JobRecord::new(job_id, owner, size))?;
            if registered {
                info!(job_id = ?prior.external_job_id, "job record missing, re-registered");
                self.metrics.record_reregistration();
            }
            return Ok(Reconciliation {
                state: prior.clone(),
                logs: Vec::new(),
                registered,
            });
        };

        let mut errors = ErrorCollector::new();
        let mut statuses = CompactedStatusArray::new(size);
        let mut summary = ArraySummary::new();
        let mut logs = Vec::new();
        let mut original_indexes = prior.cached_indexes.iter_unset();

        for (child, existing) in prior.statuses.iter().enumerate() {
            let original_index = original_indexes.next().ok_or(Error::Core(
                tributary_core::Error::IndexOutOfRange {
                    index: child,
                    len: size,
                },
            ))?;
            if existing.is_terminal() {
                statuses.set(child, existing)?;
                summary.inc(existing);
                continue;
            }

            let status = entry.value.effective_status(child, &entry.health);
            logs.extend(
                self.links
                    .child_links(&entry.value, child, original_index, status.phase),
            );

            if status.phase.is_failure() {
                if let Some(message) = status.message.as_deref().filter(|m| !m.is_empty()) {
                    errors.collect(child, message);
                }
            }

            statuses.set(child, status.phase)?;
            summary.inc(status.phase);
        }

        let mut phase = summary_to_phase(&summary, prior.needed_successes(), size as u64);
        // A degraded record holds children at their last phase; the parent
        // retries until the record recovers or the breaker trips.
        let sync_error = match &entry.health {
            SyncHealth::Degraded { last_error, .. } if phase == AggregatePhase::CheckingSubTasks => {
                phase = AggregatePhase::RetryableFailure;
                Some(truncate(
                    last_error.clone(),
                    self.config.max_error_string_length,
                ))
            }
            _ => None,
        };
        let phase_version = if phase == AggregatePhase::CheckingSubTasks {
            summary_version(&summary)
        } else {
            DEFAULT_PHASE_VERSION
        };
        let error_text =
            errors.summarize_after(&prior.error_text, self.config.max_error_string_length);

        if phase != prior.phase {
            debug!(from = %prior.phase, to = %phase, successes = summary.successes(), "array phase changed");
        }
        self.metrics.record_reconcile_round(phase.to_phase());

        Ok(Reconciliation {
            state: ParentAggregateState {
                phase,
                phase_version,
                statuses,
                summary,
                error_text,
                sync_error,
                external_job_id: prior.external_job_id.clone(),
                min_successes: prior.min_successes,
                cached_indexes: prior.cached_indexes.clone(),
            },
            logs,
            registered: false,
        })
    }
}
