//! # tributary-core
//!
//! Shared primitives for the tributary plugin core.
//!
//! This crate provides the value types every plugin and the reconciliation
//! engine agree on:
//!
//! - **Phases**: The canonical nine-state execution enumeration and its
//!   stable name/code tables
//! - **Phase Reports**: [`PhaseInfo`], classified execution errors, log links
//! - **Packed Storage**: Fixed-width bit arrays and bitsets used by array tasks
//! - **Status Arrays**: Bit-packed per-child phases and their summaries
//! - **Resource Scopes**: Namespaces and constraint specs for admission control
//!
//! ## Crate Boundary
//!
//! `tributary-core` has no knowledge of caches, plugins or external systems.
//! Anything persisted between reconciliation rounds is defined here so its
//! format stays in one place.
//!
//! ## Example
//!
//! ```rust
//! use tributary_core::prelude::*;
//!
//! let mut statuses = CompactedStatusArray::new(3);
//! statuses.set(1, Phase::Success).unwrap();
//!
//! let summary = statuses.summarize();
//! assert_eq!(summary.successes(), 1);
//! assert_eq!(summary.count(Phase::Undefined), 2);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod bitarray;
pub mod compact;
pub mod error;
pub mod observability;
pub mod phase;
pub mod phase_info;
pub mod resource;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bitarray::{BitSet, PackedArray};
    pub use crate::compact::{ArraySummary, CompactedStatusArray, PHASE_BITS};
    pub use crate::error::{Error, Result};
    pub use crate::phase::{Phase, PhaseVersion, DEFAULT_PHASE_VERSION};
    pub use crate::phase_info::{ExecutionError, FailureKind, PhaseInfo, TaskInfo, TaskLog};
    pub use crate::resource::{ResourceConstraintsSpec, ResourceNamespace};
}

// Re-export key types at crate root for ergonomics
pub use bitarray::{BitSet, PackedArray};
pub use compact::{ArraySummary, CompactedStatusArray};
pub use error::{Error, Result};
pub use observability::{init_logging, LogFormat};
pub use phase::{Phase, PhaseVersion, DEFAULT_PHASE_VERSION};
pub use phase_info::{ExecutionError, FailureKind, PhaseInfo, TaskInfo, TaskLog};
pub use resource::{ResourceConstraintsSpec, ResourceNamespace};
