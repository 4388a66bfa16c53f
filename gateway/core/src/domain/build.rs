// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Build run state machine.
//!
//! `Pending → Building → (Tagging) → (Pushing) → (Deploying) → Succeeded`,
//! or `Failed { at_step }` from any non-terminal state. Steps are never
//! undone; a failed run keeps every identifier produced before the failure.

use crate::domain::fault::OperationFault;
use crate::domain::policy::PolicyViolationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Non-terminal build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStep {
    Pending,
    Building,
    Tagging,
    Pushing,
    Deploying,
}

impl BuildStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Tagging => "tagging",
            Self::Pushing => "pushing",
            Self::Deploying => "deploying",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BuildState {
    Active { step: BuildStep },
    Succeeded,
    Failed { at_step: BuildStep, fault: OperationFault },
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active { .. })
    }

    pub fn label(&self) -> String {
        match self {
            Self::Active { step } => step.to_string(),
            Self::Succeeded => "succeeded".to_string(),
            Self::Failed { at_step, .. } => format!("failed at {}", at_step),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: BuildStep,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One build/deploy invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRun {
    /// `{project}-{uuid}`
    pub id: String,
    pub project: String,
    pub state: BuildState,
    pub steps: Vec<StepRecord>,
    /// Image id reported by the daemon at the end of the build step
    pub image_id: Option<String>,
    /// Tags known to point at the built image
    pub tags: Vec<String>,
    /// Container created by the deploy step
    pub container_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BuildRun {
    pub fn new(project: impl Into<String>) -> Self {
        let project = project.into();
        Self {
            id: format!("{}-{}", project, Uuid::new_v4()),
            project,
            state: BuildState::Active {
                step: BuildStep::Pending,
            },
            steps: Vec::new(),
            image_id: None,
            tags: Vec::new(),
            container_id: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Current (or, once failed, the failing) step.
    pub fn current_step(&self) -> Option<BuildStep> {
        match &self.state {
            BuildState::Active { step } => Some(*step),
            BuildState::Failed { at_step, .. } => Some(*at_step),
            BuildState::Succeeded => None,
        }
    }

    pub fn begin(&mut self, step: BuildStep) {
        self.state = BuildState::Active { step };
        self.steps.push(StepRecord {
            step,
            status: StepStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            detail: None,
        });
    }

    pub fn complete_step(&mut self, detail: Option<String>) {
        if let Some(record) = self.steps.last_mut() {
            if record.status == StepStatus::Running {
                record.status = StepStatus::Succeeded;
                record.finished_at = Some(Utc::now());
                record.detail = detail;
            }
        }
    }

    /// Terminal failure at the current step.
    pub fn fail(&mut self, fault: OperationFault) {
        let at_step = self.current_step().unwrap_or(BuildStep::Pending);
        let now = Utc::now();
        if let Some(record) = self.steps.last_mut() {
            if record.status == StepStatus::Running {
                record.status = StepStatus::Failed;
                record.finished_at = Some(now);
                record.detail = Some(fault.to_string());
            }
        }
        self.state = BuildState::Failed { at_step, fault };
        self.finished_at = Some(now);
    }

    pub fn succeed(&mut self) {
        self.state = BuildState::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.state == BuildState::Succeeded
    }

    pub fn fault(&self) -> Option<&OperationFault> {
        match &self.state {
            BuildState::Failed { fault, .. } => Some(fault),
            _ => None,
        }
    }

    /// Policy category of the failure, when the run was refused up front.
    pub fn rejection(&self) -> Option<PolicyViolationKind> {
        self.fault().and_then(OperationFault::policy_kind)
    }

    /// Steps that completed, in order.
    pub fn completed_steps(&self) -> Vec<BuildStep> {
        self.steps
            .iter()
            .filter(|r| r.status == StepStatus::Succeeded)
            .map(|r| r.step)
            .collect()
    }

    pub fn reached(&self, step: BuildStep) -> bool {
        self.steps.iter().any(|r| r.step == step)
    }
}

/// Observation emitted while a build runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    StepStarted { build_id: String, step: BuildStep },
    Output { build_id: String, step: BuildStep, line: String },
    StepCompleted { build_id: String, step: BuildStep },
    Finished { run: Box<BuildRun> },
}
