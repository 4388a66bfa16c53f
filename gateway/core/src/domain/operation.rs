// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Strict, validated operation shapes.
//!
//! Values of these types are only constructed by the validation engine (or
//! by tests exercising the executor directly). Numeric parameters are
//! already clamped and paths already normalized.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    /// Lines from the end of the log; already clamped.
    pub tail: u32,
    pub follow: bool,
    pub timestamps: bool,
    /// Unix seconds lower bound.
    pub since: Option<i64>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            tail: 100,
            follow: false,
            timestamps: false,
            since: None,
        }
    }
}

/// Per-container command after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ContainerCommand {
    Start,
    Stop { timeout_secs: u32 },
    Restart { timeout_secs: u32 },
    Remove { force: bool, volumes: bool },
    Logs(LogOptions),
    Stats,
    Inspect,
}

impl ContainerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop { .. } => "stop",
            Self::Restart { .. } => "restart",
            Self::Remove { .. } => "remove",
            Self::Logs(_) => "logs",
            Self::Stats => "stats",
            Self::Inspect => "inspect",
        }
    }
}

/// Host bind mount whose source has been checked against the allow-roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl MountSpec {
    /// Docker `binds` syntax: `src:dst[:ro]`.
    pub fn to_bind(&self) -> String {
        let mut bind = format!("{}:{}", self.source.display(), self.target);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyKind {
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl RestartPolicyKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "no" => Some(Self::No),
            "always" => Some(Self::Always),
            "unless-stopped" => Some(Self::UnlessStopped),
            "on-failure" => Some(Self::OnFailure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
            Self::OnFailure => "on-failure",
        }
    }
}

/// Container creation shape. Never carries privileged mode, host
/// namespaces or unlisted capabilities: those are rejected upstream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub command: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    /// container port -> host port (tcp)
    pub ports: BTreeMap<u16, u16>,
    pub mounts: Vec<MountSpec>,
    pub cap_add: Vec<String>,
    /// Bridge or user-defined network name; never `host`.
    pub network: Option<String>,
    pub nano_cpus: Option<i64>,
    pub memory_bytes: Option<i64>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub restart_policy: Option<RestartPolicyKind>,
    pub labels: BTreeMap<String, String>,
    pub auto_remove: bool,
}

impl ContainerSpec {
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSpec {
    pub image: String,
    pub tag: String,
}

impl PullSpec {
    /// `image:tag`, or the bare image when it is pinned by digest.
    pub fn reference(&self) -> String {
        if self.tag.is_empty() {
            self.image.clone()
        } else {
            format!("{}:{}", self.image, self.tag)
        }
    }
}

/// Build pipeline requested for a registered project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub project: String,
    pub context: PathBuf,
    pub dockerfile: String,
    /// Primary `repo:tag` produced by the build step.
    pub tag: String,
    pub extra_tags: Vec<String>,
    pub push: bool,
    pub deploy: bool,
    pub no_cache: bool,
}

impl BuildPlan {
    /// Tags the push step sends. A bare `name[:tag]` resolves to the
    /// registry's official-image namespace, so only tags naming a registry
    /// or a namespace are pushed; the rest stay local.
    pub fn push_tags(&self) -> Vec<String> {
        std::iter::once(&self.tag)
            .chain(&self.extra_tags)
            .filter(|tag| tag.contains('/'))
            .cloned()
            .collect()
    }
}

/// An admitted request in its strict internal form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ValidatedOperation {
    Container { id: String, command: ContainerCommand },
    CreateContainer { spec: ContainerSpec, start: bool },
    PullImage(PullSpec),
    RemoveImage { id: String, force: bool },
    Build(BuildPlan),
}
