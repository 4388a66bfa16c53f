// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Closed fault taxonomy surfaced to callers.
//!
//! [`DaemonFault`] is what the executor produces after classifying a daemon
//! client error. [`OperationFault`] adds the pre-flight policy rejection and
//! is the only error type the application layer returns.

use crate::domain::policy::{PolicyViolation, PolicyViolationKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Classified daemon failure. The client's own error type never escapes the
/// executor.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum DaemonFault {
    #[error("Not found: {target}")]
    NotFound { target: String },

    #[error("Conflict: {detail}")]
    Conflict { detail: String },

    /// The daemon may or may not have completed the operation.
    #[error("Daemon call '{operation}' exceeded its {budget_ms}ms budget")]
    Timeout { operation: String, budget_ms: u64 },

    #[error("Daemon unreachable: {detail}")]
    Unreachable { detail: String },

    #[error("Upstream fault: {detail}")]
    UpstreamFault { detail: String },
}

impl DaemonFault {
    pub fn timeout(operation: impl Into<String>, budget: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            budget_ms: budget.as_millis() as u64,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Timeout { .. } => "timeout",
            Self::Unreachable { .. } => "unreachable",
            Self::UpstreamFault { .. } => "upstream_fault",
        }
    }
}

/// Every failure an operation or build can report.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum OperationFault {
    /// Refused before any daemon call; recoverable by adjusting parameters.
    #[error("Policy violation ({kind}): {detail}")]
    PolicyViolation {
        kind: PolicyViolationKind,
        detail: String,
    },

    #[error("Not found: {target}")]
    NotFound { target: String },

    #[error("Conflict: {detail}")]
    Conflict { detail: String },

    #[error("Operation '{operation}' timed out after {budget_ms}ms; re-query state before retrying")]
    Timeout { operation: String, budget_ms: u64 },

    #[error("Daemon unreachable: {detail}")]
    Unreachable { detail: String },

    #[error("Upstream fault: {detail}")]
    UpstreamFault { detail: String },
}

impl OperationFault {
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict {
            detail: detail.into(),
        }
    }

    pub fn not_found(target: impl Into<String>) -> Self {
        Self::NotFound {
            target: target.into(),
        }
    }

    pub fn upstream(detail: impl Into<String>) -> Self {
        Self::UpstreamFault {
            detail: detail.into(),
        }
    }

    /// Policy category of a pre-flight rejection.
    pub fn policy_kind(&self) -> Option<PolicyViolationKind> {
        match self {
            Self::PolicyViolation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<PolicyViolation> for OperationFault {
    fn from(violation: PolicyViolation) -> Self {
        Self::PolicyViolation {
            kind: violation.kind,
            detail: violation.detail,
        }
    }
}

impl From<DaemonFault> for OperationFault {
    fn from(fault: DaemonFault) -> Self {
        match fault {
            DaemonFault::NotFound { target } => Self::NotFound { target },
            DaemonFault::Conflict { detail } => Self::Conflict { detail },
            DaemonFault::Timeout {
                operation,
                budget_ms,
            } => Self::Timeout {
                operation,
                budget_ms,
            },
            DaemonFault::Unreachable { detail } => Self::Unreachable { detail },
            DaemonFault::UpstreamFault { detail } => Self::UpstreamFault { detail },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_violation_keeps_kind() {
        let fault: OperationFault = PolicyViolation::unknown_project("nope").into();
        assert_eq!(fault.policy_kind(), Some(PolicyViolationKind::UnknownProject));
    }

    #[test]
    fn test_daemon_fault_mapping() {
        let fault: OperationFault = DaemonFault::timeout("stop_container", Duration::from_secs(2)).into();
        assert!(fault.is_timeout());
        assert!(fault.to_string().contains("2000ms"));

        let fault: OperationFault = DaemonFault::Conflict {
            detail: "already stopped".to_string(),
        }
        .into();
        assert!(fault.is_conflict());
        assert_eq!(fault.policy_kind(), None);
    }
}
