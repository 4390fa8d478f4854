//! Phase reports returned by plugins.
//!
//! A [`PhaseInfo`] is what a plugin hands back to the engine after inspecting
//! an external resource: the phase, its version, optional log links and, for
//! failures, an [`ExecutionError`] classified as user or system caused.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::{Phase, PhaseVersion, DEFAULT_PHASE_VERSION};

/// Who is responsible for a failure.
///
/// User failures need the task author to act (bad input, missing access).
/// System failures are the platform's or the external backend's fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Caused by the task author.
    User,
    /// Caused by the platform or the external system.
    System,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "USER"),
            Self::System => write!(f, "SYSTEM"),
        }
    }
}

/// Classified failure reported alongside a failed phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    /// Backend-specific reason code (e.g. `http503`, `quotaExceeded`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Responsibility classification.
    pub kind: FailureKind,
}

impl ExecutionError {
    /// Creates a user-caused error.
    #[must_use]
    pub fn user(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind: FailureKind::User,
        }
    }

    /// Creates a system-caused error.
    #[must_use]
    pub fn system(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind: FailureKind::System,
        }
    }
}

/// A link to logs or a console page for an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLog {
    /// Display name.
    pub name: String,
    /// Target URI.
    pub uri: String,
}

impl TaskLog {
    /// Creates a new log link.
    #[must_use]
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }
}

/// Supplementary details attached to a phase report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// When the observation was made.
    pub occurred_at: DateTime<Utc>,
    /// Log links.
    #[serde(default)]
    pub logs: Vec<TaskLog>,
}

impl TaskInfo {
    /// Creates task info observed now with the given log links.
    #[must_use]
    pub fn with_logs(logs: Vec<TaskLog>) -> Self {
        Self {
            occurred_at: Utc::now(),
            logs,
        }
    }
}

/// A plugin's report on the state of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseInfo {
    /// Reported phase.
    pub phase: Phase,
    /// Version within the phase.
    pub version: PhaseVersion,
    /// Free-form reason for the phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Classified error for failure phases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ExecutionError>,
    /// Supplementary details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<TaskInfo>,
}

impl PhaseInfo {
    fn bare(phase: Phase, version: PhaseVersion, info: Option<TaskInfo>) -> Self {
        Self {
            phase,
            version,
            reason: None,
            err: None,
            info,
        }
    }

    /// Nothing is known about the execution.
    #[must_use]
    pub fn undefined() -> Self {
        Self::bare(Phase::Undefined, DEFAULT_PHASE_VERSION, None)
    }

    /// The execution cannot start yet.
    #[must_use]
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::bare(Phase::NotReady, DEFAULT_PHASE_VERSION, None).with_reason(reason)
    }

    /// The execution is waiting for an admission grant.
    #[must_use]
    pub fn waiting_for_resources(reason: impl Into<String>) -> Self {
        Self::bare(Phase::WaitingForResources, DEFAULT_PHASE_VERSION, None).with_reason(reason)
    }

    /// The execution was accepted by the external system.
    #[must_use]
    pub fn queued(info: Option<TaskInfo>) -> Self {
        Self::bare(Phase::Queued, DEFAULT_PHASE_VERSION, info)
    }

    /// The execution is running.
    #[must_use]
    pub fn running(version: PhaseVersion, info: Option<TaskInfo>) -> Self {
        Self::bare(Phase::Running, version, info)
    }

    /// The execution completed successfully.
    #[must_use]
    pub fn success(info: Option<TaskInfo>) -> Self {
        Self::bare(Phase::Success, DEFAULT_PHASE_VERSION, info)
    }

    /// The execution failed with a classified error.
    ///
    /// `phase` should be one of the failure phases.
    #[must_use]
    pub fn failed(phase: Phase, err: ExecutionError, info: Option<TaskInfo>) -> Self {
        let mut phase_info = Self::bare(phase, DEFAULT_PHASE_VERSION, info);
        phase_info.reason = Some(err.message.clone());
        phase_info.err = Some(err);
        phase_info
    }

    /// A failure that a retry may fix.
    #[must_use]
    pub fn retryable_failure(
        code: impl Into<String>,
        message: impl Into<String>,
        info: Option<TaskInfo>,
    ) -> Self {
        Self::failed(
            Phase::RetryableFailure,
            ExecutionError::system(code, message),
            info,
        )
    }

    /// A failure that a retry will not fix.
    #[must_use]
    pub fn permanent_failure(
        code: impl Into<String>,
        message: impl Into<String>,
        info: Option<TaskInfo>,
    ) -> Self {
        Self::failed(
            Phase::PermanentFailure,
            ExecutionError::user(code, message),
            info,
        )
    }

    /// Attaches a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Returns the log links, if any.
    #[must_use]
    pub fn logs(&self) -> &[TaskLog] {
        self.info.as_ref().map_or(&[], |info| info.logs.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_copies_message_into_reason() {
        let info = PhaseInfo::failed(
            Phase::PermanentFailure,
            ExecutionError::user("invalidQuery", "syntax error at line 1"),
            None,
        );
        assert_eq!(info.reason.as_deref(), Some("syntax error at line 1"));
        assert_eq!(info.err.map(|e| e.kind), Some(FailureKind::User));
    }

    #[test]
    fn running_keeps_version() {
        let info = PhaseInfo::running(7, Some(TaskInfo::with_logs(vec![TaskLog::new(
            "console",
            "https://example.com",
        )])));
        assert_eq!(info.version, 7);
        assert_eq!(info.logs().len(), 1);
    }

    #[test]
    fn success_resets_version() {
        assert_eq!(PhaseInfo::success(None).version, DEFAULT_PHASE_VERSION);
        assert!(PhaseInfo::undefined().logs().is_empty());
    }
}
