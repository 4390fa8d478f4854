//! Property-based tests for reconciliation invariants.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;
use tributary_core::Phase;
use tributary_plugins::array::error_collector::{ErrorCollector, TRUNCATION_MARKER};
use tributary_plugins::array::links::BatchConsoleLinks;
use tributary_plugins::array::reconcile::ArrayReconciler;
use tributary_plugins::array::ParentAggregateState;
use tributary_plugins::cache::job_store::{JobRecord, JobStore, SubJob, SubJobStatus};
use tributary_plugins::cache::{SyncError, SyncFunc};
use tributary_plugins::config::{ArrayConfig, CachingConfig};

struct Idle;

#[async_trait]
impl SyncFunc<JobRecord> for Idle {
    async fn sync(
        &self,
        _key: &str,
        _current: &JobRecord,
        _cancel: &CancellationToken,
    ) -> Result<Vec<SubJob>, SyncError> {
        Ok(Vec::new())
    }
}

fn arb_phase() -> impl Strategy<Value = Phase> {
    prop::sample::select(Phase::enumerate().to_vec())
}

/// Generates child phases and a minimum success count within the array size.
fn arb_array() -> impl Strategy<Value = (Vec<Phase>, u64)> {
    prop::collection::vec(arb_phase(), 1..40).prop_flat_map(|phases| {
        let size = phases.len() as u64;
        (Just(phases), 1..=size)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn summary_never_exceeds_bound(
        messages in prop::collection::vec((0usize..1000, ".{0,80}"), 0..50),
        max_length in 0usize..300,
    ) {
        let mut collector = ErrorCollector::new();
        for (index, message) in &messages {
            collector.collect(*index, message.clone());
        }
        let text = collector.summarize(max_length);

        prop_assert!(text.chars().count() <= max_length);
        let full = collector.summarize(usize::MAX);
        if messages.is_empty() {
            prop_assert_eq!(text, "");
        } else if full.chars().count() > max_length && max_length >= TRUNCATION_MARKER.len() {
            prop_assert!(text.ends_with(TRUNCATION_MARKER));
        } else if full.chars().count() <= max_length {
            prop_assert_eq!(text, full);
        }
    }

    #[test]
    fn repeated_round_is_idempotent((phases, min_successes) in arb_array()) {
        let store = JobStore::new(
            CachingConfig { size: 8, ..CachingConfig::default() },
            Arc::new(Idle),
        )
        .unwrap();
        let reconciler = ArrayReconciler::new(
            ArrayConfig { max_error_string_length: 256, ..ArrayConfig::default() },
            Arc::new(BatchConsoleLinks::new("us-east-1")),
        );
        let initial = ParentAggregateState::uncached("job-1", phases.len(), min_successes);
        let registered = reconciler.reconcile(&store, "exec-1", "node-a", &initial).unwrap();
        prop_assert!(registered.registered);

        for (index, phase) in phases.iter().enumerate() {
            let status = if phase.is_failure() {
                SubJobStatus::failed(*phase, format!("child {index} failed"))
            } else {
                SubJobStatus::new(*phase)
            };
            store.update_sub_job("exec-1", index, status).unwrap();
        }

        let first = reconciler.reconcile(&store, "exec-1", "node-a", &registered.state).unwrap();
        let second = reconciler.reconcile(&store, "exec-1", "node-a", &first.state).unwrap();
        prop_assert_eq!(&first.state, &second.state);
        prop_assert!(first.state.error_text.chars().count() <= 256);
        prop_assert_eq!(first.state.summary.total(), phases.len() as u64);
    }
}
