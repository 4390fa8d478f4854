//! Property-based tests for tributary-core invariants.
//!
//! These tests use proptest to verify the phase tables, packed storage and
//! the persisted status-array format across randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;

use tributary_core::{BitSet, CompactedStatusArray, Error, PackedArray, Phase};

/// Generates one of the nine canonical phases.
fn arb_phase() -> impl Strategy<Value = Phase> {
    prop::sample::select(Phase::enumerate().to_vec())
}

/// Generates a capacity and a subset of positions below it.
fn arb_cache_index_set() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1usize..300).prop_flat_map(|cap| (Just(cap), prop::collection::vec(0..cap, 0..cap)))
}

proptest! {
    #[test]
    fn phase_name_round_trips(phase in arb_phase()) {
        prop_assert_eq!(Phase::parse(phase.name()).unwrap(), phase);
        prop_assert_eq!(Phase::from_code(u64::from(phase.code())).unwrap(), phase);
    }

    #[test]
    fn unknown_names_are_rejected(name in "[A-Za-z]{1,24}") {
        prop_assume!(Phase::enumerate().iter().all(|p| p.name() != name));
        let is_unrecognized = matches!(Phase::parse(&name), Err(Error::UnrecognizedPhase { .. }));
        prop_assert!(is_unrecognized);
    }

    #[test]
    fn terminal_iff_success_or_failure(phase in arb_phase()) {
        prop_assert_eq!(
            phase.is_terminal(),
            matches!(phase, Phase::Success | Phase::RetryableFailure | Phase::PermanentFailure)
        );
    }

    #[test]
    fn status_array_serde_is_exact(phases in prop::collection::vec(arb_phase(), 0..500)) {
        let mut array = CompactedStatusArray::new(phases.len());
        for (idx, phase) in phases.iter().enumerate() {
            array.set(idx, *phase).unwrap();
        }

        let json = serde_json::to_string(&array).unwrap();
        let restored: CompactedStatusArray = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(restored.iter().collect::<Vec<_>>(), phases.clone());

        let summary = restored.summarize();
        prop_assert_eq!(summary.total(), phases.len() as u64);
    }

    #[test]
    fn packed_array_stores_any_fitting_value(
        width in 1u8..=32,
        raw in prop::collection::vec(any::<u32>(), 1..64),
    ) {
        let mut array = PackedArray::new(raw.len(), width).unwrap();
        let max = array.max_value();
        let values: Vec<u32> = raw.iter().map(|v| v & max).collect();
        for (idx, value) in values.iter().enumerate() {
            array.set(idx, *value).unwrap();
        }
        prop_assert_eq!(array.iter().collect::<Vec<_>>(), values);
    }

    #[test]
    fn nth_unset_is_inverse_rank((cap, positions) in arb_cache_index_set()) {
        let set = BitSet::with_set(cap, positions).unwrap();
        let unset: Vec<usize> = (0..cap).filter(|p| !set.is_set(*p)).collect();

        prop_assert_eq!(unset.len(), set.count_unset());
        for (compacted, original) in unset.iter().enumerate() {
            prop_assert_eq!(set.nth_unset(compacted), Some(*original));
            let below = (0..*original).filter(|p| !set.is_set(*p)).count();
            prop_assert_eq!(below, compacted);
        }
        prop_assert_eq!(set.nth_unset(unset.len()), None);
    }
}
