//! Admission control for external submissions.
//!
//! This module provides:
//!
//! - [`AdmissionController`]: Trait gating how many submissions a namespace
//!   and its project may have in flight
//! - [`memory::InMemoryAdmissionController`]: Process-local implementation
//! - [`rate_limit`]: Token-bucket limiters for read and write calls
//!
//! ## Scopes
//!
//! A submission is granted only if its namespace is below the namespace-scope
//! bound and its project is below the project-scope bound. An absent bound is
//! unlimited. Every grant must be paired with exactly one
//! [`AdmissionController::release`].

pub mod memory;
pub mod rate_limit;

use std::fmt;

use async_trait::async_trait;
use tributary_core::{ResourceConstraintsSpec, ResourceNamespace};

use crate::error::Result;

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The submission may proceed and holds one slot.
    Granted,
    /// The submission must wait.
    Denied {
        /// Reason for denial.
        reason: DenialReason,
    },
}

impl AdmissionDecision {
    /// Returns true if the submission was granted.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Reason an admission was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The namespace reached its bound.
    NamespaceLimit {
        /// In-flight submissions in the namespace.
        current: u64,
        /// Effective namespace bound.
        limit: u64,
    },
    /// The owning project reached its bound.
    ProjectLimit {
        /// In-flight submissions in the project.
        current: u64,
        /// Project bound.
        limit: u64,
    },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamespaceLimit { current, limit } => {
                write!(f, "namespace limit reached: {current}/{limit}")
            }
            Self::ProjectLimit { current, limit } => {
                write!(f, "project limit reached: {current}/{limit}")
            }
        }
    }
}

/// Tracks in-flight external submissions per namespace and project.
///
/// ## Thread Safety
///
/// `try_admit` is an atomic check-and-reserve; concurrent callers can never
/// oversubscribe a bound.
#[async_trait]
pub trait AdmissionController: Send + Sync {
    /// Reserves one slot for `namespace` if both scopes have capacity.
    async fn try_admit(
        &self,
        namespace: &ResourceNamespace,
        constraints: &ResourceConstraintsSpec,
    ) -> Result<AdmissionDecision>;

    /// Returns a slot previously granted to `namespace`.
    ///
    /// Releasing a namespace with nothing in flight is a no-op.
    async fn release(&self, namespace: &ResourceNamespace) -> Result<()>;

    /// In-flight submissions for a namespace.
    async fn namespace_in_flight(&self, namespace: &ResourceNamespace) -> Result<u64>;

    /// In-flight submissions across all namespaces of a project.
    async fn project_in_flight(&self, project: &str) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_is_granted() {
        assert!(AdmissionDecision::Granted.is_granted());
        assert!(!AdmissionDecision::Denied {
            reason: DenialReason::ProjectLimit {
                current: 1,
                limit: 1
            }
        }
        .is_granted());
    }

    #[test]
    fn denial_reason_display() {
        let reason = DenialReason::NamespaceLimit {
            current: 50,
            limit: 50,
        };
        assert_eq!(reason.to_string(), "namespace limit reached: 50/50");
    }
}
