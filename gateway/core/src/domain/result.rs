// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Normalized result model.
//!
//! Raw daemon payloads arrive as Docker Engine API JSON. The constructors in
//! this module pick the fields we expose and discard the rest, so callers
//! never depend on the daemon's wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Observed container state, normalized from the daemon's status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    /// Daemon status `exited`.
    Stopped,
    Dead,
    /// No longer known to the daemon after a successful remove.
    Removed,
    Unknown,
}

impl ContainerStatus {
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" | "stopped" => Self::Stopped,
            "dead" => Self::Dead,
            "removed" => Self::Removed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Stopped => "stopped",
            Self::Dead => "dead",
            Self::Removed => "removed",
            Self::Unknown => "unknown",
        }
    }

    /// States in which a follow-mode log stream will not receive more lines.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Dead | Self::Removed)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn str_field(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn u64_field(value: &Value, pointer: &str) -> Option<u64> {
    value.pointer(pointer).and_then(Value::as_u64)
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub short_id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerStatus,
    /// Human status line from the daemon, e.g. `Up 3 minutes`.
    pub status: String,
    pub created: Option<i64>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSummary {
    /// From one element of a `GET /containers/json` response.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let id = str_field(raw, "/Id")?;
        let name = raw
            .pointer("/Names/0")
            .and_then(Value::as_str)
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        Some(Self {
            short_id: short_id(&id),
            id,
            name,
            image: str_field(raw, "/Image").unwrap_or_default(),
            state: ContainerStatus::parse(&str_field(raw, "/State").unwrap_or_default()),
            status: str_field(raw, "/Status").unwrap_or_default(),
            created: raw.pointer("/Created").and_then(Value::as_i64),
            labels: string_map(raw.get("Labels")),
        })
    }
}

/// Detailed view from `GET /containers/{id}/json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerStatus,
    pub running: bool,
    pub exit_code: Option<i64>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub restart_count: u64,
    pub created: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerDetails {
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let id = str_field(raw, "/Id")?;
        Some(Self {
            id,
            name: str_field(raw, "/Name")
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: str_field(raw, "/Config/Image")
                .or_else(|| str_field(raw, "/Image"))
                .unwrap_or_default(),
            state: ContainerStatus::parse(&str_field(raw, "/State/Status").unwrap_or_default()),
            running: raw
                .pointer("/State/Running")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            exit_code: raw.pointer("/State/ExitCode").and_then(Value::as_i64),
            started_at: str_field(raw, "/State/StartedAt"),
            finished_at: str_field(raw, "/State/FinishedAt"),
            restart_count: u64_field(raw, "/RestartCount").unwrap_or(0),
            created: str_field(raw, "/Created"),
            labels: string_map(raw.pointer("/Config/Labels")),
        })
    }
}

/// Point-in-time resource snapshot. No averaging across samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub id: String,
    pub cpu_percent: f64,
    pub online_cpus: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
    pub pids: Option<u64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl StatsSnapshot {
    /// From a one-shot `GET /containers/{id}/stats?stream=false` sample.
    pub fn from_raw(id: &str, raw: &Value) -> Self {
        let total = u64_field(raw, "/cpu_stats/cpu_usage/total_usage").unwrap_or(0);
        let pre_total = u64_field(raw, "/precpu_stats/cpu_usage/total_usage").unwrap_or(0);
        let system = u64_field(raw, "/cpu_stats/system_cpu_usage").unwrap_or(0);
        let pre_system = u64_field(raw, "/precpu_stats/system_cpu_usage").unwrap_or(0);
        let online_cpus = u64_field(raw, "/cpu_stats/online_cpus")
            .or_else(|| {
                raw.pointer("/cpu_stats/cpu_usage/percpu_usage")
                    .and_then(Value::as_array)
                    .map(|a| a.len() as u64)
            })
            .filter(|n| *n > 0)
            .unwrap_or(1);

        let cpu_delta = total.saturating_sub(pre_total) as f64;
        let system_delta = system.saturating_sub(pre_system) as f64;
        let cpu_percent = if system_delta > 0.0 {
            cpu_delta / system_delta * online_cpus as f64 * 100.0
        } else {
            0.0
        };

        // Page cache is reclaimable; the docker CLI reports usage without it.
        let cache = u64_field(raw, "/memory_stats/stats/inactive_file")
            .or_else(|| u64_field(raw, "/memory_stats/stats/total_inactive_file"))
            .unwrap_or(0);
        let memory_usage = u64_field(raw, "/memory_stats/usage")
            .unwrap_or(0)
            .saturating_sub(cache);
        let memory_limit = u64_field(raw, "/memory_stats/limit").unwrap_or(0);
        let memory_percent = if memory_limit > 0 {
            memory_usage as f64 / memory_limit as f64 * 100.0
        } else {
            0.0
        };

        let (network_rx_bytes, network_tx_bytes) = raw
            .get("networks")
            .and_then(Value::as_object)
            .map(|networks| {
                networks.values().fold((0u64, 0u64), |(rx, tx), net| {
                    (
                        rx + u64_field(net, "/rx_bytes").unwrap_or(0),
                        tx + u64_field(net, "/tx_bytes").unwrap_or(0),
                    )
                })
            })
            .unwrap_or((0, 0));

        let (block_read_bytes, block_write_bytes) = raw
            .pointer("/blkio_stats/io_service_bytes_recursive")
            .and_then(Value::as_array)
            .map(|entries| {
                entries.iter().fold((0u64, 0u64), |(read, write), entry| {
                    let value = u64_field(entry, "/value").unwrap_or(0);
                    match entry.get("op").and_then(Value::as_str).map(str::to_ascii_lowercase) {
                        Some(op) if op == "read" => (read + value, write),
                        Some(op) if op == "write" => (read, write + value),
                        _ => (read, write),
                    }
                })
            })
            .unwrap_or((0, 0));

        Self {
            id: id.to_string(),
            cpu_percent: round2(cpu_percent),
            online_cpus,
            memory_usage,
            memory_limit,
            memory_percent: round2(memory_percent),
            network_rx_bytes,
            network_tx_bytes,
            block_read_bytes,
            block_write_bytes,
            pids: u64_field(raw, "/pids_stats/current"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub short_id: String,
    pub tags: Vec<String>,
    pub size: u64,
    pub created: Option<i64>,
    pub labels: BTreeMap<String, String>,
}

impl ImageSummary {
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let id = str_field(raw, "/Id")?;
        let tags = raw
            .get("RepoTags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .filter(|t| *t != "<none>:<none>")
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            short_id: short_id(&id),
            id,
            tags,
            size: u64_field(raw, "/Size").unwrap_or(0),
            created: raw.pointer("/Created").and_then(Value::as_i64),
            labels: string_map(raw.get("Labels")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    Console,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub stream: LogStream,
    pub message: String,
}

impl LogLine {
    pub fn stdout(message: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stdout,
            message: message.into(),
        }
    }

    pub fn stderr(message: impl Into<String>) -> Self {
        Self {
            stream: LogStream::Stderr,
            message: message.into(),
        }
    }
}

/// One progress record from a pull, build or push stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    /// Build output line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Image id announced by a finished build.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

impl ProgressEvent {
    pub fn from_raw(raw: &Value) -> Self {
        let error = str_field(raw, "/error")
            .or_else(|| str_field(raw, "/errorDetail/message"))
            .or_else(|| str_field(raw, "/error_detail/message"));
        Self {
            id: str_field(raw, "/id"),
            status: str_field(raw, "/status"),
            progress: str_field(raw, "/progress"),
            stream: str_field(raw, "/stream"),
            error,
            image_id: str_field(raw, "/aux/ID"),
        }
    }

    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    /// Human-readable single line, if the event carries any text.
    pub fn line(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        if let Some(stream) = &self.stream {
            let trimmed = stream.trim_end();
            return (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        match (&self.id, &self.status, &self.progress) {
            (Some(id), Some(status), Some(progress)) => Some(format!("{}: {} {}", id, status, progress)),
            (Some(id), Some(status), None) => Some(format!("{}: {}", id, status)),
            (None, Some(status), _) => Some(status.clone()),
            _ => None,
        }
    }
}

/// Action-specific payload of an [`OperationResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultDetails {
    None,
    Container(ContainerDetails),
    Stats(StatsSnapshot),
    Logs { lines: Vec<LogLine> },
    Created { warnings: Vec<String> },
    Image { removed: Vec<String>, untagged: Vec<String> },
    Pull { reference: String, events: usize },
}

/// Normalized outcome of one operation. Not retained by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// e.g. `container.stop`
    pub action: String,
    pub id: String,
    pub status: String,
    pub details: ResultDetails,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    pub fn new(action: impl Into<String>, id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            id: id.into(),
            status: status.into(),
            details: ResultDetails::None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: ResultDetails) -> Self {
        self.details = details;
        self
    }
}

pub fn short_id(id: &str) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.chars().take(12).collect()
}
