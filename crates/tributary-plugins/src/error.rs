//! Error types for plugin machinery.

use tributary_core::FailureKind;

/// The result type used throughout tributary-plugins.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in plugin, cache and admission operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A blocking wait was abandoned because the caller cancelled it.
    #[error("operation cancelled")]
    Cancelled,

    /// Shared state could not be accessed (e.g. a poisoned lock).
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Configuration was rejected.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the invalid setting.
        message: String,
    },

    /// No plugin is registered for a task type.
    #[error("no plugin registered for task type: {task_type}")]
    PluginNotFound {
        /// The task type that was looked up.
        task_type: String,
    },

    /// A plugin id or task type was registered twice.
    #[error("duplicate plugin registration: {id}")]
    DuplicatePlugin {
        /// The conflicting plugin id or task type.
        id: String,
    },

    /// A call to an external system failed.
    #[error("external {kind} failure: {message}")]
    External {
        /// Whether the user or the system is responsible.
        kind: FailureKind,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// State handed to an operation was inconsistent with its inputs.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the inconsistency.
        message: String,
    },

    /// An error from tributary-core.
    #[error("core error: {0}")]
    Core(#[from] tributary_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new invalid-state error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a user-caused external failure.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::External {
            kind: FailureKind::User,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a system-caused external failure.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self::External {
            kind: FailureKind::System,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an external failure with an underlying cause.
    #[must_use]
    pub fn external_with_source(
        kind: FailureKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Classifies this error for retry decisions.
    ///
    /// Only explicit user failures are attributed to the user; everything
    /// else, including local storage problems, is a system failure.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::External { kind, .. } => *kind,
            _ => FailureKind::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn external_error_display_includes_kind() {
        let err = Error::user("table not found");
        assert_eq!(err.to_string(), "external USER failure: table not found");
        assert_eq!(err.failure_kind(), FailureKind::User);
    }

    #[test]
    fn non_external_errors_are_system_failures() {
        assert_eq!(Error::Cancelled.failure_kind(), FailureKind::System);
        assert_eq!(Error::storage("poisoned").failure_kind(), FailureKind::System);
    }

    #[test]
    fn external_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::external_with_source(FailureKind::System, "poll failed", source);
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn core_errors_convert() {
        let err: Error = tributary_core::Error::IndexOutOfRange { index: 3, len: 2 }.into();
        assert!(err.to_string().contains("index 3 out of range"));
    }
}
