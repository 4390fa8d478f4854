//! Outcome classification for warehouse query jobs.
//!
//! A warehouse job is created with one call and then polled until its state
//! is `DONE`. Failures arrive either as an HTTP error from the create call or
//! as an error result with a reason code on the finished job. Both are
//! mapped to a failure phase and a user/system attribution here.

use serde::{Deserialize, Serialize};
use tributary_core::{
    ExecutionError, FailureKind, Phase, PhaseInfo, TaskInfo, TaskLog, DEFAULT_PHASE_VERSION,
};

use crate::error::{Error, Result};

/// Retry class and attribution of a failed warehouse job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Either [`Phase::RetryableFailure`] or [`Phase::PermanentFailure`].
    pub phase: Phase,
    /// Who is responsible for the failure.
    pub kind: FailureKind,
}

impl Classification {
    const fn retryable(kind: FailureKind) -> Self {
        Self {
            phase: Phase::RetryableFailure,
            kind,
        }
    }

    const fn permanent(kind: FailureKind) -> Self {
        Self {
            phase: Phase::PermanentFailure,
            kind,
        }
    }
}

/// Classifies an error-result reason code.
///
/// Returns `None` for the empty reason, which means the job succeeded.
/// Unrecognized reasons are permanent system failures.
#[must_use]
pub fn classify_reason(reason: &str) -> Option<Classification> {
    use FailureKind::{System, User};

    let classification = match reason {
        "" => return None,
        "backendError" | "internalError" | "invalidUser" | "resourceInUse" | "tableUnavailable" => {
            Classification::retryable(System)
        }
        "quotaExceeded" | "rateLimitExceeded" => Classification::retryable(User),
        "accessDenied" | "billingNotEnabled" | "blocked" | "duplicate" | "invalid"
        | "invalidQuery" | "notFound" | "notImplemented" | "resourcesExceeded"
        | "responseTooLarge" | "stopped" | "timeout" => Classification::permanent(User),
        _ => Classification::permanent(System),
    };
    Some(classification)
}

/// Builds the phase for a finished job's error result.
#[must_use]
pub fn error_result_phase(reason: &str, message: &str, info: Option<TaskInfo>) -> PhaseInfo {
    let Some(Classification { phase, kind }) = classify_reason(reason) else {
        return PhaseInfo::success(info);
    };
    let err = match kind {
        FailureKind::User => ExecutionError::user(reason, message),
        FailureKind::System => ExecutionError::system(reason, message),
    };
    PhaseInfo::failed(phase, err, info)
}

/// Builds the phase for a failed create call with the given HTTP status.
///
/// Client errors are the user's and will not succeed on retry; server errors
/// are retried. The code is reported as `http<status>`.
#[must_use]
pub fn create_error_phase(status: u16, message: &str, info: Option<TaskInfo>) -> PhaseInfo {
    let code = format!("http{status}");
    match status {
        400..=499 => PhaseInfo::failed(
            Phase::PermanentFailure,
            ExecutionError::user(code, message),
            info,
        ),
        500..=u16::MAX => PhaseInfo::failed(
            Phase::RetryableFailure,
            ExecutionError::system(code, message),
            info,
        ),
        _ => PhaseInfo::failed(
            Phase::PermanentFailure,
            ExecutionError::system(code, message),
            info,
        ),
    }
}

/// Error result on a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    /// Reason code, empty when the job succeeded.
    #[serde(default)]
    pub reason: String,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// Error returned by the create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateError {
    /// HTTP status code.
    pub code: u16,
    /// Error message.
    pub message: String,
}

/// Observed state of a warehouse job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseJobStatus {
    /// `PENDING`, `RUNNING` or `DONE`.
    #[serde(default)]
    pub state: String,
    /// Set on a finished job that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_result: Option<ErrorResult>,
    /// Set instead of a state when creation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_error: Option<CreateError>,
}

/// Identifies a job in the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    /// Billing project.
    pub project_id: String,
    /// Processing location.
    pub location: String,
    /// Job identifier, the execution's generated name.
    pub job_id: String,
}

impl JobReference {
    /// Link to the job's results in the warehouse console.
    #[must_use]
    pub fn console_link(&self) -> TaskLog {
        TaskLog::new(
            "Warehouse Console",
            format!(
                "https://console.cloud.google.com/bigquery?project={}&j=bq:{}:{}&page=queryresults",
                self.project_id, self.location, self.job_id
            ),
        )
    }
}

impl std::fmt::Display for JobReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}.{}", self.project_id, self.location, self.job_id)
    }
}

/// Maps a polled job to its phase.
///
/// # Errors
///
/// Returns a system error for a state the warehouse does not document.
pub fn job_phase(reference: &JobReference, status: &WarehouseJobStatus) -> Result<PhaseInfo> {
    let info = Some(TaskInfo::with_logs(vec![reference.console_link()]));

    if let Some(create) = &status.create_error {
        return Ok(create_error_phase(create.code, &create.message, info));
    }

    match status.state.as_str() {
        "PENDING" | "RUNNING" => Ok(PhaseInfo::running(DEFAULT_PHASE_VERSION, info)),
        "DONE" => Ok(match &status.error_result {
            Some(result) => error_result_phase(&result.reason, &result.message, info),
            None => PhaseInfo::success(info),
        }),
        other => Err(Error::system(format!(
            "unknown state [{other}] for job {reference}"
        ))),
    }
}
