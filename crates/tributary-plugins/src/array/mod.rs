//! Array tasks: one parent execution fanned out into N children.
//!
//! This module provides:
//!
//! - [`ParentAggregateState`]: the persisted per-execution state that each
//!   reconciliation round replaces wholesale
//! - [`AggregatePhase`]: the parent's array-specific phase
//! - [`reconcile::ArrayReconciler`]: folds child states into a new parent state
//! - [`error_collector::ErrorCollector`]: bounded per-child failure text
//! - [`links`]: log links for children still being checked
//! - [`launcher::ArrayJobLauncher`]: submits and terminates array jobs
//!
//! ## Cached Positions
//!
//! Some positions of the original array may have been served from a prior
//! cache and are not executed. A [`BitSet`] over the original positions marks
//! those; the N unset positions are the executed children, numbered
//! `0..N` in order ("compacted" indexes).

pub mod error_collector;
pub mod launcher;
pub mod links;
pub mod reconcile;

use std::fmt;

use serde::{Deserialize, Serialize};
use tributary_core::{
    ArraySummary, BitSet, CompactedStatusArray, Phase, PhaseInfo, PhaseVersion, TaskInfo,
    TaskLog, DEFAULT_PHASE_VERSION,
};

use crate::error::{Error, Result};

/// Reason code attached to failed array tasks.
pub const SUB_TASKS_FAILED: &str = "SubTasksFailed";

/// Phase of an array task's parent execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregatePhase {
    /// Children are still running; the parent keeps polling.
    #[default]
    CheckingSubTasks,
    /// Enough children succeeded.
    Success,
    /// Some child failed in a way a retry may fix.
    RetryableFailure,
    /// Too few children can still succeed.
    PermanentFailure,
}

impl AggregatePhase {
    /// The canonical phase reported for this aggregate phase.
    #[must_use]
    pub const fn to_phase(self) -> Phase {
        match self {
            Self::CheckingSubTasks => Phase::Running,
            Self::Success => Phase::Success,
            Self::RetryableFailure => Phase::RetryableFailure,
            Self::PermanentFailure => Phase::PermanentFailure,
        }
    }

    /// Returns true for either failure phase.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::RetryableFailure | Self::PermanentFailure)
    }

    /// Returns true once the parent stops checking.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::CheckingSubTasks)
    }
}

impl fmt::Display for AggregatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CheckingSubTasks => "CheckingSubTasks",
            Self::Success => "Success",
            Self::RetryableFailure => "RetryableFailure",
            Self::PermanentFailure => "PermanentFailure",
        };
        f.write_str(name)
    }
}

/// Persisted state of an array task's parent execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentAggregateState {
    /// Current aggregate phase.
    pub phase: AggregatePhase,
    /// Version within the phase.
    pub phase_version: PhaseVersion,
    /// Per-child phases, indexed by compacted index.
    pub statuses: CompactedStatusArray,
    /// Phase histogram of `statuses` as of the last round.
    pub summary: ArraySummary,
    /// Collected failure text, bounded.
    #[serde(default)]
    pub error_text: String,
    /// Latest refresh error of the job record while it is degraded, bounded.
    /// Recomputed every round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
    /// External job identifier, once submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_job_id: Option<String>,
    /// Successes required across the original array.
    pub min_successes: u64,
    /// Original positions served from a prior cache.
    pub cached_indexes: BitSet,
}

impl ParentAggregateState {
    /// Creates the state for a submitted array job.
    ///
    /// The number of executed children is the number of unset positions in
    /// `cached_indexes`; the original array size is its capacity.
    #[must_use]
    pub fn new(
        external_job_id: impl Into<String>,
        min_successes: u64,
        cached_indexes: BitSet,
    ) -> Self {
        let statuses = CompactedStatusArray::new(cached_indexes.count_unset());
        Self {
            phase: AggregatePhase::CheckingSubTasks,
            phase_version: DEFAULT_PHASE_VERSION,
            summary: statuses.summarize(),
            statuses,
            error_text: String::new(),
            sync_error: None,
            external_job_id: Some(external_job_id.into()),
            min_successes,
            cached_indexes,
        }
    }

    /// Creates the state for an array job with no cached positions.
    #[must_use]
    pub fn uncached(external_job_id: impl Into<String>, size: usize, min_successes: u64) -> Self {
        Self::new(external_job_id, min_successes, BitSet::new(size))
    }

    /// Number of executed children.
    #[must_use]
    pub fn execution_size(&self) -> usize {
        self.statuses.len()
    }

    /// Size of the original array, cached positions included.
    #[must_use]
    pub fn original_size(&self) -> usize {
        self.cached_indexes.cap()
    }

    /// Successes still needed from executed children.
    #[must_use]
    pub fn needed_successes(&self) -> u64 {
        let cached = (self.original_size() - self.execution_size()) as u64;
        self.min_successes.saturating_sub(cached)
    }

    /// Maps a compacted child index to its original array position.
    ///
    /// # Errors
    ///
    /// Returns an error if `child` is not below the execution size.
    pub fn original_index(&self, child: usize) -> Result<usize> {
        self.cached_indexes.nth_unset(child).ok_or_else(|| {
            Error::Core(tributary_core::Error::IndexOutOfRange {
                index: child,
                len: self.execution_size(),
            })
        })
    }

    /// Checks that the status array matches the cached positions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if they disagree on the child count.
    pub fn validate(&self) -> Result<()> {
        let unset = self.cached_indexes.count_unset();
        if unset != self.execution_size() {
            return Err(Error::invalid_state(format!(
                "status array holds {} children but {unset} positions are not cached",
                self.execution_size()
            )));
        }
        Ok(())
    }

    /// The failure reason to report, if the parent failed.
    ///
    /// Child failure text wins over a refresh error.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        if !self.phase.is_failure() {
            return None;
        }
        match self.sync_error.as_deref() {
            Some(sync_error) if self.error_text.is_empty() => Some(sync_error),
            _ => Some(self.error_text.as_str()),
        }
    }

    /// Builds the phase report for this state.
    #[must_use]
    pub fn to_phase_info(&self, logs: Vec<TaskLog>) -> PhaseInfo {
        let info = Some(TaskInfo::with_logs(logs));
        let reason = self.failure_reason().unwrap_or_default().to_string();
        match self.phase {
            AggregatePhase::CheckingSubTasks => PhaseInfo::running(self.phase_version, info),
            AggregatePhase::Success => PhaseInfo::success(info),
            AggregatePhase::RetryableFailure => {
                PhaseInfo::retryable_failure(SUB_TASKS_FAILED, reason, info)
            }
            AggregatePhase::PermanentFailure => {
                PhaseInfo::permanent_failure(SUB_TASKS_FAILED, reason, info)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_sizes_from_cached_indexes() {
        let cached = BitSet::with_set(5, [1, 3]).unwrap();
        let state = ParentAggregateState::new("job-1", 4, cached);
        assert_eq!(state.execution_size(), 3);
        assert_eq!(state.original_size(), 5);
        assert_eq!(state.needed_successes(), 2);
        assert_eq!(state.original_index(1).unwrap(), 2);
        assert!(state.original_index(3).is_err());
        assert!(state.validate().is_ok());
    }

    #[test]
    fn needed_successes_never_underflows() {
        let cached = BitSet::with_set(10, 0..8).unwrap();
        let state = ParentAggregateState::new("job-1", 5, cached);
        assert_eq!(state.needed_successes(), 0);
    }

    #[test]
    fn mismatched_state_is_invalid() {
        let mut state = ParentAggregateState::uncached("job-1", 4, 4);
        state.statuses = CompactedStatusArray::new(3);
        assert!(matches!(state.validate(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn failure_reason_only_for_failures() {
        let mut state = ParentAggregateState::uncached("job-1", 2, 2);
        state.error_text = "0: oom".into();
        assert_eq!(state.failure_reason(), None);
        state.phase = AggregatePhase::PermanentFailure;
        assert_eq!(state.failure_reason(), Some("0: oom"));

        let info = state.to_phase_info(vec![]);
        assert_eq!(info.phase, Phase::PermanentFailure);
        assert_eq!(info.reason.as_deref(), Some("0: oom"));
    }

    #[test]
    fn sync_error_explains_failure_without_child_text() {
        let mut state = ParentAggregateState::uncached("job-1", 2, 2);
        state.phase = AggregatePhase::RetryableFailure;
        state.sync_error = Some("describe jobs: timeout".into());
        assert_eq!(state.failure_reason(), Some("describe jobs: timeout"));

        state.error_text = "1: oom".into();
        let info = state.to_phase_info(vec![]);
        assert_eq!(info.phase, Phase::RetryableFailure);
        assert_eq!(info.reason.as_deref(), Some("1: oom"));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = ParentAggregateState::new("job-1", 2, BitSet::with_set(4, [0]).unwrap());
        state.statuses.set(2, Phase::Success).unwrap();
        state.summary = state.statuses.summarize();
        state.phase_version = 18;

        let json = serde_json::to_string(&state).unwrap();
        let back: ParentAggregateState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn aggregate_phase_maps_to_canonical_phase() {
        assert_eq!(AggregatePhase::CheckingSubTasks.to_phase(), Phase::Running);
        assert_eq!(AggregatePhase::Success.to_phase(), Phase::Success);
        assert!(AggregatePhase::RetryableFailure.is_terminal());
        assert!(!AggregatePhase::CheckingSubTasks.is_terminal());
    }
}
