// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Known-project registry.
//!
//! Build targets are allowlisted by name. The registry is loaded once with
//! the configuration and is read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Settings for the container a project is deployed into.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Container name; defaults to the project name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// container port -> host port
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Restart policy name (`no`, `always`, `unless-stopped`, `on-failure`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub name: String,

    /// Host directory holding the build context.
    pub context: PathBuf,

    /// Dockerfile relative to the context.
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    /// Default `repo:tag`; `{name}:latest` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_tag: Option<String>,

    #[serde(default)]
    pub deploy: DeploySettings,
}

impl ProjectDescriptor {
    pub fn new(name: impl Into<String>, context: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            dockerfile: default_dockerfile(),
            default_tag: None,
            deploy: DeploySettings::default(),
        }
    }

    pub fn tag(&self) -> String {
        self.default_tag
            .clone()
            .unwrap_or_else(|| format!("{}:latest", self.name))
    }

    pub fn container_name(&self) -> String {
        self.deploy
            .container_name
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

/// Immutable name -> descriptor lookup.
#[derive(Debug, Clone, Default)]
pub struct ProjectRegistry {
    projects: HashMap<String, ProjectDescriptor>,
}

impl ProjectRegistry {
    pub fn new(descriptors: impl IntoIterator<Item = ProjectDescriptor>) -> Self {
        let projects = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.name.clone(), descriptor))
            .collect();
        Self { projects }
    }

    pub fn get(&self, name: &str) -> Option<&ProjectDescriptor> {
        self.projects.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.projects.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.projects.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
