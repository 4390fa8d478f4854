//! Per-child phase storage for array tasks.
//!
//! A [`CompactedStatusArray`] stores one [`Phase`] per child in
//! [`PHASE_BITS`] bits. With tens of thousands of children this keeps the
//! persisted state a quarter of a byte-per-child encoding.
//!
//! [`ArraySummary`] is the phase histogram derived from the array. It is
//! recomputed from scratch each round rather than maintained incrementally.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::bitarray::PackedArray;
use crate::error::{Error, Result};
use crate::phase::Phase;

/// Bits used per child. Part of the persisted format; 4 bits cover codes 0-8.
pub const PHASE_BITS: u8 = 4;

/// Fixed-length, bit-packed sequence of child phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CompactedStatusRepr", into = "CompactedStatusRepr")]
pub struct CompactedStatusArray {
    items: PackedArray,
}

/// Persisted form: `{ size, bitsPerItem, blocks }` with base64 blocks.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompactedStatusRepr {
    size: usize,
    bits_per_item: u8,
    blocks: String,
}

impl TryFrom<CompactedStatusRepr> for CompactedStatusArray {
    type Error = Error;

    fn try_from(repr: CompactedStatusRepr) -> Result<Self> {
        if repr.bits_per_item != PHASE_BITS {
            return Err(Error::serialization(format!(
                "status array must use {PHASE_BITS} bits per item, got {}",
                repr.bits_per_item
            )));
        }
        let bytes = STANDARD
            .decode(repr.blocks.as_bytes())
            .map_err(|e| Error::serialization(format!("invalid status array blocks: {e}")))?;
        let items = PackedArray::from_bytes(repr.size, PHASE_BITS, bytes)?;
        for code in items.iter() {
            Phase::from_code(u64::from(code))?;
        }
        Ok(Self { items })
    }
}

impl From<CompactedStatusArray> for CompactedStatusRepr {
    fn from(array: CompactedStatusArray) -> Self {
        Self {
            size: array.items.len(),
            bits_per_item: PHASE_BITS,
            blocks: STANDARD.encode(array.items.as_bytes()),
        }
    }
}

impl CompactedStatusArray {
    /// Creates an array of `size` children, all [`Phase::Undefined`].
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            items: PackedArray::zeroed(size, PHASE_BITS),
        }
    }

    /// Number of children.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no children.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reads the phase of child `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] outside `0..len`.
    pub fn get(&self, index: usize) -> Result<Phase> {
        Phase::from_code(u64::from(self.items.get(index)?))
    }

    /// Writes the phase of child `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] outside `0..len`.
    pub fn set(&mut self, index: usize, phase: Phase) -> Result<()> {
        self.items.set(index, u32::from(phase.code()))
    }

    /// Iterates over child phases in index order.
    pub fn iter(&self) -> impl Iterator<Item = Phase> + '_ {
        // Codes are validated on every write and on deserialization.
        self.items
            .iter()
            .map(|code| Phase::from_code(u64::from(code)).unwrap_or_default())
    }

    /// Counts children per phase.
    #[must_use]
    pub fn summarize(&self) -> ArraySummary {
        let mut summary = ArraySummary::default();
        for phase in self.iter() {
            summary.inc(phase);
        }
        summary
    }
}

/// Phase histogram over an array's children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArraySummary(BTreeMap<Phase, u64>);

impl ArraySummary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one child in `phase`.
    pub fn inc(&mut self, phase: Phase) {
        *self.0.entry(phase).or_insert(0) += 1;
    }

    /// Number of children in `phase`.
    #[must_use]
    pub fn count(&self, phase: Phase) -> u64 {
        self.0.get(&phase).copied().unwrap_or(0)
    }

    /// Total number of children counted.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    /// Number of children that succeeded.
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.count(Phase::Success)
    }

    /// Number of children that reached a terminal phase.
    #[must_use]
    pub fn terminal(&self) -> u64 {
        self.iter()
            .filter(|(phase, _)| phase.is_terminal())
            .map(|(_, count)| count)
            .sum()
    }

    /// Iterates `(phase, count)` pairs in phase-code order.
    pub fn iter(&self) -> impl Iterator<Item = (Phase, u64)> + '_ {
        self.0.iter().map(|(phase, count)| (*phase, *count))
    }
}

impl FromIterator<Phase> for ArraySummary {
    fn from_iter<I: IntoIterator<Item = Phase>>(iter: I) -> Self {
        let mut summary = Self::default();
        for phase in iter {
            summary.inc(phase);
        }
        summary
    }
}
