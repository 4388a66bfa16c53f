// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Inbound operation requests.
//!
//! An [`OperationRequest`] is the loose shape a caller hands us: a target, an
//! action kind and a string-keyed map of primitive options. Nothing here is
//! trusted. The validation engine translates an admitted request into a
//! [`crate::domain::operation::ValidatedOperation`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Primitive option value supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl OptionValue {
    /// Booleans, `0`/`1` and the usual textual spellings.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            Self::Text(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) if f.is_finite() => Some(*f),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<u32> for OptionValue {
    fn from(value: u32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

pub type OptionMap = BTreeMap<String, OptionValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerActionKind {
    Start,
    Stop,
    Restart,
    Remove,
    Logs,
    Stats,
    Inspect,
    /// Target is an image reference; creates without starting.
    Create,
    /// Target is an image reference; creates then starts.
    Run,
}

impl ContainerActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Remove => "remove",
            Self::Logs => "logs",
            Self::Stats => "stats",
            Self::Inspect => "inspect",
            Self::Create => "create",
            Self::Run => "run",
        }
    }

    /// Whether the target names an image rather than a container.
    pub fn targets_image(&self) -> bool {
        matches!(self, Self::Create | Self::Run)
    }
}

impl fmt::Display for ContainerActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageActionKind {
    Pull,
    Remove,
}

impl ImageActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for ImageActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed operation, as received from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum OperationRequest {
    Container {
        target: String,
        action: ContainerActionKind,
        #[serde(default)]
        options: OptionMap,
    },
    Image {
        target: String,
        action: ImageActionKind,
        #[serde(default)]
        options: OptionMap,
    },
    Build {
        project: String,
        #[serde(default)]
        options: OptionMap,
    },
}

impl OperationRequest {
    pub fn container(target: impl Into<String>, action: ContainerActionKind) -> Self {
        Self::Container {
            target: target.into(),
            action,
            options: OptionMap::new(),
        }
    }

    pub fn image(target: impl Into<String>, action: ImageActionKind) -> Self {
        Self::Image {
            target: target.into(),
            action,
            options: OptionMap::new(),
        }
    }

    pub fn build(project: impl Into<String>) -> Self {
        Self::Build {
            project: project.into(),
            options: OptionMap::new(),
        }
    }

    /// Builder-style option setter, used while assembling a request.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options_mut().insert(key.into(), value.into());
        self
    }

    pub fn with_options(mut self, options: OptionMap) -> Self {
        self.options_mut().extend(options);
        self
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Container { target, .. } | Self::Image { target, .. } => target,
            Self::Build { project, .. } => project,
        }
    }

    pub fn options(&self) -> &OptionMap {
        match self {
            Self::Container { options, .. }
            | Self::Image { options, .. }
            | Self::Build { options, .. } => options,
        }
    }

    fn options_mut(&mut self) -> &mut OptionMap {
        match self {
            Self::Container { options, .. }
            | Self::Image { options, .. }
            | Self::Build { options, .. } => options,
        }
    }

    /// Short label for logs, e.g. `container.stop`.
    pub fn label(&self) -> String {
        match self {
            Self::Container { action, .. } => format!("container.{}", action),
            Self::Image { action, .. } => format!("image.{}", action),
            Self::Build { .. } => "build".to_string(),
        }
    }
}

/// Criteria for listing containers. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFilter {
    /// Include stopped containers
    #[serde(default)]
    pub all: bool,
    pub status: Option<String>,
    /// `key` or `key=value`
    pub label: Option<String>,
    pub name: Option<String>,
}

impl ContainerFilter {
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
