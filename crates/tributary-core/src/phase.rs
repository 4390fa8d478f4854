//! Canonical execution phases shared by every task and sub-task.
//!
//! A [`Phase`] is a closed enumeration with a stable numeric code (0-8) and a
//! stable name. Both forms are persisted: codes inside bit-packed status
//! arrays, names in serialized records. The lookup tables below are the only
//! place either mapping is defined.
//!
//! ```text
//! code  name                  terminal
//! ----  --------------------  --------
//!  0    Undefined
//!  1    NotReady
//!  2    WaitingForResources
//!  3    Queued
//!  4    Initializing
//!  5    Running
//!  6    Success               yes
//!  7    RetryableFailure      yes
//!  8    PermanentFailure      yes
//! ```
//!
//! No transitions are enforced here. Transition legality belongs to the
//! reconciliation engine and the surrounding workflow engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Counter scoped to a single (execution, phase) pair.
///
/// It increases to signal an observable sub-state change without a phase
/// transition and resets to [`DEFAULT_PHASE_VERSION`] whenever the phase
/// itself changes.
pub type PhaseVersion = u32;

/// Version reported on every phase change.
pub const DEFAULT_PHASE_VERSION: PhaseVersion = 0;

/// Canonical execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
#[repr(u8)]
pub enum Phase {
    /// No information is available yet.
    #[default]
    Undefined = 0,
    /// Preconditions for starting are not met.
    NotReady = 1,
    /// Waiting on an admission or quota grant.
    WaitingForResources = 2,
    /// Accepted by the external system, not yet started.
    Queued = 3,
    /// Starting up.
    Initializing = 4,
    /// Executing.
    Running = 5,
    /// Completed successfully.
    Success = 6,
    /// Failed in a way that a retry may fix.
    RetryableFailure = 7,
    /// Failed in a way that a retry will not fix.
    PermanentFailure = 8,
}

/// Name table indexed by phase code.
const PHASE_NAMES: [&str; 9] = [
    "Undefined",
    "NotReady",
    "WaitingForResources",
    "Queued",
    "Initializing",
    "Running",
    "Success",
    "RetryableFailure",
    "PermanentFailure",
];

impl Phase {
    /// Every phase, ordered by numeric code.
    pub const ALL: [Self; 9] = [
        Self::Undefined,
        Self::NotReady,
        Self::WaitingForResources,
        Self::Queued,
        Self::Initializing,
        Self::Running,
        Self::Success,
        Self::RetryableFailure,
        Self::PermanentFailure,
    ];

    /// Number of distinct phases.
    pub const COUNT: usize = Self::ALL.len();

    /// Returns every phase ordered by numeric code.
    #[must_use]
    pub fn enumerate() -> &'static [Self] {
        &Self::ALL
    }

    /// Returns the stable numeric code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decodes a numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPhaseCode`] for codes outside 0-8.
    pub fn from_code(code: u64) -> Result<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
            .ok_or(Error::InvalidPhaseCode { code })
    }

    /// Returns the stable wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        PHASE_NAMES[self as usize]
    }

    /// Parses a wire name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnrecognizedPhase`] if `name` is not in the table.
    pub fn parse(name: &str) -> Result<Self> {
        PHASE_NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|idx| Self::ALL[idx])
            .ok_or_else(|| Error::UnrecognizedPhase {
                name: name.to_string(),
            })
    }

    /// Returns true for `Success`, `RetryableFailure` and `PermanentFailure`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::RetryableFailure | Self::PermanentFailure
        )
    }

    /// Returns true for either failure class.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::RetryableFailure | Self::PermanentFailure)
    }

    /// Returns true for `Success`.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::NotReady => "not_ready",
            Self::WaitingForResources => "waiting_for_resources",
            Self::Queued => "queued",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Success => "success",
            Self::RetryableFailure => "retryable_failure",
            Self::PermanentFailure => "permanent_failure",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Phase> for &'static str {
    fn from(phase: Phase) -> Self {
        phase.name()
    }
}

impl TryFrom<String> for Phase {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_parse_round_trip_for_every_code() {
        for (code, phase) in Phase::enumerate().iter().enumerate() {
            assert_eq!(usize::from(phase.code()), code);
            assert_eq!(Phase::parse(phase.name()), Ok(*phase));
        }
    }

    #[test]
    fn parse_rejects_unknown_names() {
        for name in ["", "running", "PhaseRunning", "Succeeded", "Success "] {
            assert!(matches!(
                Phase::parse(name),
                Err(Error::UnrecognizedPhase { .. })
            ));
        }
    }

    #[test]
    fn terminal_set_is_exactly_success_and_failures() {
        let terminal: Vec<Phase> = Phase::ALL.into_iter().filter(|p| p.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                Phase::Success,
                Phase::RetryableFailure,
                Phase::PermanentFailure
            ]
        );
    }

    #[test]
    fn from_code_rejects_out_of_table() {
        assert_eq!(Phase::from_code(8), Ok(Phase::PermanentFailure));
        assert_eq!(
            Phase::from_code(9),
            Err(Error::InvalidPhaseCode { code: 9 })
        );
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Phase::WaitingForResources).unwrap();
        assert_eq!(json, "\"WaitingForResources\"");

        let parsed: Phase = serde_json::from_str("\"RetryableFailure\"").unwrap();
        assert_eq!(parsed, Phase::RetryableFailure);

        assert!(serde_json::from_str::<Phase>("\"Paused\"").is_err());
    }

    #[test]
    fn ordering_follows_codes() {
        assert!(Phase::Undefined < Phase::Running);
        assert!(Phase::Success < Phase::PermanentFailure);
    }
}
