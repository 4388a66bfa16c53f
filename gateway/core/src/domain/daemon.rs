// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Daemon client port.
//!
//! The container daemon is reached through [`DaemonClient`], an opaque
//! transport. Only the daemon executor holds a client; everything above it
//! speaks in [`DaemonCall`]s and receives classified faults.

use crate::domain::operation::{ContainerSpec, LogOptions};
use crate::domain::result::LogLine;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A single bounded request to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCall {
    Ping,
    ListContainers {
        all: bool,
        filters: BTreeMap<String, Vec<String>>,
    },
    InspectContainer {
        id: String,
    },
    StartContainer {
        id: String,
    },
    StopContainer {
        id: String,
        timeout_secs: u32,
    },
    RestartContainer {
        id: String,
        timeout_secs: u32,
    },
    RemoveContainer {
        id: String,
        force: bool,
        volumes: bool,
    },
    ContainerStats {
        id: String,
    },
    CreateContainer {
        spec: ContainerSpec,
    },
    ListImages {
        all: bool,
    },
    InspectImage {
        id: String,
    },
    RemoveImage {
        id: String,
        force: bool,
    },
    TagImage {
        source: String,
        repo: String,
        tag: String,
    },
    CreateNetwork {
        name: String,
        driver: String,
        labels: BTreeMap<String, String>,
    },
    ListNetworks {
        filters: BTreeMap<String, Vec<String>>,
    },
    RemoveNetwork {
        id: String,
    },
}

impl DaemonCall {
    /// Stable operation name for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::ListContainers { .. } => "list_containers",
            Self::InspectContainer { .. } => "inspect_container",
            Self::StartContainer { .. } => "start_container",
            Self::StopContainer { .. } => "stop_container",
            Self::RestartContainer { .. } => "restart_container",
            Self::RemoveContainer { .. } => "remove_container",
            Self::ContainerStats { .. } => "container_stats",
            Self::CreateContainer { .. } => "create_container",
            Self::ListImages { .. } => "list_images",
            Self::InspectImage { .. } => "inspect_image",
            Self::RemoveImage { .. } => "remove_image",
            Self::TagImage { .. } => "tag_image",
            Self::CreateNetwork { .. } => "create_network",
            Self::ListNetworks { .. } => "list_networks",
            Self::RemoveNetwork { .. } => "remove_network",
        }
    }

    /// Identifier the call acts on, used to label `NotFound` faults.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Ping
            | Self::ListContainers { .. }
            | Self::ListImages { .. }
            | Self::ListNetworks { .. } => None,
            Self::InspectContainer { id }
            | Self::StartContainer { id }
            | Self::StopContainer { id, .. }
            | Self::RestartContainer { id, .. }
            | Self::RemoveContainer { id, .. }
            | Self::ContainerStats { id }
            | Self::InspectImage { id }
            | Self::RemoveImage { id, .. }
            | Self::RemoveNetwork { id } => Some(id),
            Self::CreateContainer { spec } => Some(&spec.image),
            Self::TagImage { source, .. } => Some(source),
            Self::CreateNetwork { name, .. } => Some(name),
        }
    }

    /// Time the daemon may legitimately spend waiting on the container
    /// before it answers, on top of the per-call budget.
    pub fn grace(&self) -> Duration {
        match self {
            Self::StopContainer { timeout_secs, .. } | Self::RestartContainer { timeout_secs, .. } => {
                Duration::from_secs(u64::from(*timeout_secs))
            }
            _ => Duration::ZERO,
        }
    }
}

/// Long-running daemon operations observed as a sequence of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCall {
    Logs {
        id: String,
        options: LogOptions,
    },
    PullImage {
        image: String,
        tag: String,
    },
    BuildImage {
        context: PathBuf,
        dockerfile: String,
        tag: String,
        no_cache: bool,
    },
    PushImage {
        image: String,
        tag: String,
    },
}

impl StreamCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Logs { .. } => "logs",
            Self::PullImage { .. } => "pull_image",
            Self::BuildImage { .. } => "build_image",
            Self::PushImage { .. } => "push_image",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Logs { id, .. } => id,
            Self::PullImage { image, .. } | Self::PushImage { image, .. } => image,
            Self::BuildImage { tag, .. } => tag,
        }
    }
}

/// Raw, unnormalized daemon reply. Bodies are Docker Engine API JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDaemonResponse {
    Empty,
    Json(Value),
}

impl RawDaemonResponse {
    pub fn json(&self) -> Option<&Value> {
        match self {
            Self::Empty => None,
            Self::Json(value) => Some(value),
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Json(value) => value,
        }
    }
}

/// Item produced by a [`StreamCall`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Log(LogLine),
    Progress(Value),
}

pub type DaemonStream = BoxStream<'static, Result<StreamItem, DaemonClientError>>;

/// Client-level failure, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaemonClientError {
    /// Socket missing, connection refused or reset.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The daemon answered with an error status.
    #[error("Daemon responded {status}: {message}")]
    Api { status: u16, message: String },

    /// The client's own request timeout fired.
    #[error("Daemon client timed out")]
    TimedOut,

    #[error("{0}")]
    Other(String),
}

impl DaemonClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Opaque transport to the container daemon.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    async fn call(&self, call: DaemonCall) -> Result<RawDaemonResponse, DaemonClientError>;

    /// Open a streaming operation. Transport errors may surface either here
    /// or as the first stream item.
    async fn open_stream(&self, call: StreamCall) -> Result<DaemonStream, DaemonClientError>;
}
