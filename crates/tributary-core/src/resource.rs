//! Resource scopes for admission control.
//!
//! External submissions are grouped by a [`ResourceNamespace`] that belongs
//! to a project. Capacity can be bounded independently at project scope and
//! at namespace scope with a [`ResourceConstraintsSpec`].
//!
//! # Example
//!
//! ```rust
//! use tributary_core::resource::{ResourceConstraintsSpec, ResourceNamespace};
//!
//! let ns = ResourceNamespace::new("analytics", "warehouse").unwrap();
//! assert_eq!(ns.to_string(), "analytics/warehouse");
//!
//! let constraints = ResourceConstraintsSpec::new(Some(100), Some(50));
//! assert_eq!(constraints.namespace_scope, Some(50));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A tenant grouping for in-flight external submissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceNamespace {
    project: String,
    name: String,
}

impl ResourceNamespace {
    /// Creates a namespace owned by `project`.
    ///
    /// # Errors
    ///
    /// Returns an error if either part is empty or contains `/`.
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let project = project.into();
        let name = name.into();
        Self::validate("project", &project)?;
        Self::validate("namespace", &name)?;
        Ok(Self { project, name })
    }

    fn validate(kind: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::InvalidInput(format!("{kind} cannot be empty")));
        }
        if value.contains('/') {
            return Err(Error::InvalidInput(format!(
                "{kind} cannot contain '/': {value}"
            )));
        }
        Ok(())
    }

    /// The owning project.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The namespace name within the project.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.name)
    }
}

/// Optional capacities at project and namespace scope.
///
/// `None` at a scope means unlimited at that scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConstraintsSpec {
    /// Maximum in-flight submissions across the whole project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_scope: Option<u64>,
    /// Maximum in-flight submissions within one namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_scope: Option<u64>,
}

impl ResourceConstraintsSpec {
    /// Creates a constraint spec.
    #[must_use]
    pub const fn new(project_scope: Option<u64>, namespace_scope: Option<u64>) -> Self {
        Self {
            project_scope,
            namespace_scope,
        }
    }

    /// No bound at either scope.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_rejects_empty_and_slashes() {
        assert!(ResourceNamespace::new("", "ns").is_err());
        assert!(ResourceNamespace::new("proj", "").is_err());
        assert!(ResourceNamespace::new("a/b", "ns").is_err());
        assert!(ResourceNamespace::new("proj", "ns").is_ok());
    }

    #[test]
    fn constraints_default_to_unlimited() {
        assert_eq!(
            ResourceConstraintsSpec::default(),
            ResourceConstraintsSpec::unlimited()
        );
    }

    #[test]
    fn constraints_serde_skips_absent_bounds() {
        let spec = ResourceConstraintsSpec::new(None, Some(50));
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"namespaceScope":50}"#);

        let parsed: ResourceConstraintsSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, ResourceConstraintsSpec::unlimited());
    }
}
