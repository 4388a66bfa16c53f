// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Policy verdicts produced by the validation engine.
//!
//! Every rejection carries a [`PolicyViolationKind`] so callers can branch
//! on the policy category without parsing the detail text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable reason a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyViolationKind {
    /// Host mount source outside the configured allow-roots, or a
    /// container-side target that exposes host internals.
    UnauthorizedMount,
    /// Privileged mode, host namespaces, capability grants, loader
    /// environment variables or known-destructive commands.
    PrivilegeEscalation,
    /// Build target not present in the project registry.
    UnknownProject,
    /// Empty, oversized, traversal-bearing or otherwise malformed identifier.
    InvalidIdentifier,
    /// Parameter that cannot be interpreted or lies outside its domain.
    ParameterOutOfRange,
}

impl PolicyViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnauthorizedMount => "UnauthorizedMount",
            Self::PrivilegeEscalation => "PrivilegeEscalation",
            Self::UnknownProject => "UnknownProject",
            Self::InvalidIdentifier => "InvalidIdentifier",
            Self::ParameterOutOfRange => "ParameterOutOfRange",
        }
    }
}

impl fmt::Display for PolicyViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused request: the category plus a diagnostic detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub kind: PolicyViolationKind,
    pub detail: String,
}

impl PolicyViolation {
    pub fn new(kind: PolicyViolationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn unauthorized_mount(detail: impl Into<String>) -> Self {
        Self::new(PolicyViolationKind::UnauthorizedMount, detail)
    }

    pub fn privilege_escalation(detail: impl Into<String>) -> Self {
        Self::new(PolicyViolationKind::PrivilegeEscalation, detail)
    }

    pub fn unknown_project(detail: impl Into<String>) -> Self {
        Self::new(PolicyViolationKind::UnknownProject, detail)
    }

    pub fn invalid_identifier(detail: impl Into<String>) -> Self {
        Self::new(PolicyViolationKind::InvalidIdentifier, detail)
    }

    pub fn out_of_range(detail: impl Into<String>) -> Self {
        Self::new(PolicyViolationKind::ParameterOutOfRange, detail)
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Outcome of validating one request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    Allowed,
    Rejected(PolicyViolation),
}

impl ValidationVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Reason code of a rejection, `None` when allowed.
    pub fn reason(&self) -> Option<PolicyViolationKind> {
        match self {
            Self::Allowed => None,
            Self::Rejected(violation) => Some(violation.kind),
        }
    }
}

impl From<Result<(), PolicyViolation>> for ValidationVerdict {
    fn from(result: Result<(), PolicyViolation>) -> Self {
        match result {
            Ok(()) => Self::Allowed,
            Err(violation) => Self::Rejected(violation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_reason() {
        assert_eq!(ValidationVerdict::Allowed.reason(), None);
        let rejected = ValidationVerdict::Rejected(PolicyViolation::unauthorized_mount("/etc"));
        assert!(!rejected.is_allowed());
        assert_eq!(rejected.reason(), Some(PolicyViolationKind::UnauthorizedMount));
    }

    #[test]
    fn test_violation_display_includes_code() {
        let violation = PolicyViolation::privilege_escalation("privileged mode is not allowed");
        assert_eq!(
            violation.to_string(),
            "PrivilegeEscalation: privileged mode is not allowed"
        );
    }
}
