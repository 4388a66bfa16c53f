// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Docker Engine adapter.
//!
//! Implements [`DaemonClient`] over bollard. Responses are handed upward as
//! the Engine API's own JSON (bollard models serialize back to the wire
//! names), so normalization happens in one place in the domain layer.

use crate::domain::daemon::{
    DaemonCall, DaemonClient, DaemonClientError, DaemonStream, RawDaemonResponse, StreamCall,
    StreamItem,
};
use crate::domain::operation::{ContainerSpec, LogOptions};
use crate::domain::result::{LogLine, LogStream};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, HostConfig, NetworkCreateRequest, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptions, CreateContainerOptionsBuilder,
    CreateImageOptionsBuilder, InspectContainerOptions, ListContainersOptions,
    ListImagesOptionsBuilder, ListNetworksOptions, LogsOptionsBuilder, PushImageOptionsBuilder,
    RemoveContainerOptionsBuilder, RemoveImageOptionsBuilder, RestartContainerOptionsBuilder,
    StartContainerOptions, StatsOptionsBuilder, StopContainerOptionsBuilder,
    TagImageOptionsBuilder,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Request timeout handed to bollard. Per-call budgets are enforced by the
/// executor; this only caps requests the executor does not bound (streams).
const CLIENT_TIMEOUT_SECS: u64 = 3600;

pub struct BollardDaemonClient {
    docker: Docker,
    endpoint: String,
}

impl BollardDaemonClient {
    /// Connect to `unix:///path`, a bare socket path, or `tcp://host:port`.
    ///
    /// Connecting does not contact the daemon; the first call does.
    pub fn connect(endpoint: &str) -> Result<Self, DaemonClientError> {
        let endpoint = endpoint.trim();
        let docker = if let Some(path) = socket_path(endpoint) {
            Docker::connect_with_socket(&path, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        } else {
            return Err(DaemonClientError::Other(format!(
                "Unsupported daemon endpoint '{}'. Use unix:///path/to/socket or tcp://host:port",
                endpoint
            )));
        }
        .map_err(|e| {
            DaemonClientError::Transport(format!(
                "Failed to connect to Docker at {}: {}",
                endpoint, e
            ))
        })?;

        info!(endpoint = %endpoint, "Docker client configured");
        Ok(Self {
            docker,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn dispatch(&self, call: DaemonCall) -> Result<RawDaemonResponse, DaemonClientError> {
        let docker = &self.docker;
        match call {
            DaemonCall::Ping => {
                docker.ping().await.map_err(translate)?;
                Ok(RawDaemonResponse::Empty)
            }
            DaemonCall::ListContainers { all, filters } => {
                let options = ListContainersOptions {
                    all,
                    filters: (!filters.is_empty())
                        .then(|| filters.into_iter().collect::<HashMap<_, _>>()),
                    ..Default::default()
                };
                json(&docker.list_containers(Some(options)).await.map_err(translate)?)
            }
            DaemonCall::InspectContainer { id } => json(
                &docker
                    .inspect_container(&id, None::<InspectContainerOptions>)
                    .await.map_err(translate)?,
            ),
            DaemonCall::StartContainer { id } => {
                docker
                    .start_container(&id, None::<StartContainerOptions>)
                    .await.map_err(translate)?;
                Ok(RawDaemonResponse::Empty)
            }
            DaemonCall::StopContainer { id, timeout_secs } => {
                let options = StopContainerOptionsBuilder::new()
                    .t(timeout_secs as i32)
                    .build();
                docker.stop_container(&id, Some(options)).await.map_err(translate)?;
                Ok(RawDaemonResponse::Empty)
            }
            DaemonCall::RestartContainer { id, timeout_secs } => {
                let options = RestartContainerOptionsBuilder::new()
                    .t(timeout_secs as i32)
                    .build();
                docker.restart_container(&id, Some(options)).await.map_err(translate)?;
                Ok(RawDaemonResponse::Empty)
            }
            DaemonCall::RemoveContainer { id, force, volumes } => {
                let options = RemoveContainerOptionsBuilder::new()
                    .force(force)
                    .v(volumes)
                    .build();
                docker.remove_container(&id, Some(options)).await.map_err(translate)?;
                Ok(RawDaemonResponse::Empty)
            }
            DaemonCall::ContainerStats { id } => {
                // Not one-shot: the daemon waits for a second sample so the
                // previous-CPU fields are populated.
                let options = StatsOptionsBuilder::new().stream(false).one_shot(false).build();
                let mut stats = docker.stats(&id, Some(options));
                match stats.next().await {
                    Some(sample) => json(&sample.map_err(translate)?),
                    None => Ok(RawDaemonResponse::Empty),
                }
            }
            DaemonCall::CreateContainer { spec } => {
                let options = spec.name.as_deref().map(|name| {
                    CreateContainerOptionsBuilder::new().name(name).build()
                });
                let body = container_body(&spec);
                let created = match options {
                    Some(options) => docker.create_container(Some(options), body).await.map_err(translate)?,
                    None => {
                        docker
                            .create_container(None::<CreateContainerOptions>, body)
                            .await.map_err(translate)?
                    }
                };
                json(&created)
            }
            DaemonCall::ListImages { all } => {
                let options = ListImagesOptionsBuilder::new().all(all).build();
                json(&docker.list_images(Some(options)).await.map_err(translate)?)
            }
            DaemonCall::InspectImage { id } => json(&docker.inspect_image(&id).await.map_err(translate)?),
            DaemonCall::RemoveImage { id, force } => {
                let options = RemoveImageOptionsBuilder::new().force(force).build();
                json(&docker.remove_image(&id, Some(options), None).await.map_err(translate)?)
            }
            DaemonCall::TagImage { source, repo, tag } => {
                let options = TagImageOptionsBuilder::new().repo(&repo).tag(&tag).build();
                docker.tag_image(&source, Some(options)).await.map_err(translate)?;
                Ok(RawDaemonResponse::Empty)
            }
            DaemonCall::CreateNetwork { name, driver, labels } => {
                let request = NetworkCreateRequest {
                    name,
                    driver: Some(driver),
                    labels: Some(labels.into_iter().collect()),
                    ..Default::default()
                };
                json(&docker.create_network(request).await.map_err(translate)?)
            }
            DaemonCall::ListNetworks { filters } => {
                let options = ListNetworksOptions {
                    filters: (!filters.is_empty())
                        .then(|| filters.into_iter().collect::<HashMap<_, _>>()),
                    ..Default::default()
                };
                json(&docker.list_networks(Some(options)).await.map_err(translate)?)
            }
            DaemonCall::RemoveNetwork { id } => {
                docker.remove_network(&id).await.map_err(translate)?;
                Ok(RawDaemonResponse::Empty)
            }
        }
    }

    async fn stream(&self, call: StreamCall) -> Result<DaemonStream, DaemonClientError> {
        let docker = &self.docker;
        let stream: DaemonStream = match call {
            StreamCall::Logs { id, options } => {
                let frames = docker.logs(&id, Some(logs_options(&options))).boxed();
                stream::unfold(
                    Some((frames, LineSplitter::default())),
                    |state| async move {
                        let (mut frames, mut splitter) = state?;
                        let (lines, next) = match frames.next().await {
                            Some(Ok(output)) => (splitter.push(output), Some((frames, splitter))),
                            Some(Err(e)) => {
                                let lines = splitter.flush().into_iter().map(Ok);
                                let items: Vec<_> = lines.chain([Err(translate(e))]).collect();
                                return Some((stream::iter(items), Some((frames, splitter))));
                            }
                            None => (splitter.flush(), None),
                        };
                        let items: Vec<Result<StreamItem, DaemonClientError>> =
                            lines.into_iter().map(Ok).collect();
                        Some((stream::iter(items), next))
                    },
                )
                .flatten()
                .boxed()
            }
            StreamCall::PullImage { image, tag } => {
                let mut builder = CreateImageOptionsBuilder::new().from_image(&image);
                if !tag.is_empty() {
                    builder = builder.tag(&tag);
                }
                docker
                    .create_image(Some(builder.build()), None, None)
                    .map(progress)
                    .boxed()
            }
            StreamCall::BuildImage {
                context,
                dockerfile,
                tag,
                no_cache,
            } => {
                let archive = archive_context(context).await?;
                let options = BuildImageOptionsBuilder::new()
                    .dockerfile(&dockerfile)
                    .t(&tag)
                    .nocache(no_cache)
                    .rm(true)
                    .build();
                docker
                    .build_image(options, None, Some(bollard::body_full(archive)))
                    .map(progress)
                    .boxed()
            }
            StreamCall::PushImage { image, tag } => {
                let options = PushImageOptionsBuilder::new().tag(&tag).build();
                docker
                    .push_image(&image, Some(options), None)
                    .map(progress)
                    .boxed()
            }
        };
        Ok(stream)
    }
}

#[async_trait]
impl DaemonClient for BollardDaemonClient {
    async fn call(&self, call: DaemonCall) -> Result<RawDaemonResponse, DaemonClientError> {
        debug!(call = call.name(), "Docker API call");
        self.dispatch(call).await
    }

    async fn open_stream(&self, call: StreamCall) -> Result<DaemonStream, DaemonClientError> {
        debug!(call = call.name(), subject = call.target(), "Docker API stream");
        self.stream(call).await
    }
}

fn socket_path(endpoint: &str) -> Option<String> {
    if let Some(path) = endpoint.strip_prefix("unix://") {
        return Some(if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        });
    }
    endpoint.starts_with('/').then(|| endpoint.to_string())
}

fn json<T: Serialize>(value: &T) -> Result<RawDaemonResponse, DaemonClientError> {
    serde_json::to_value(value)
        .map(RawDaemonResponse::Json)
        .map_err(|e| DaemonClientError::Other(format!("Unreadable daemon response: {}", e)))
}

fn progress<T: Serialize>(item: Result<T, BollardError>) -> Result<StreamItem, DaemonClientError> {
    let item = item.map_err(translate)?;
    serde_json::to_value(&item)
        .map(StreamItem::Progress)
        .map_err(|e| DaemonClientError::Other(e.to_string()))
}

fn logs_options(options: &LogOptions) -> bollard::query_parameters::LogsOptions {
    let mut builder = LogsOptionsBuilder::new()
        .stdout(true)
        .stderr(true)
        .follow(options.follow)
        .timestamps(options.timestamps)
        .tail(&options.tail.to_string());
    if let Some(since) = options.since {
        builder = builder.since(since.clamp(0, i32::MAX as i64) as i32);
    }
    builder.build()
}

/// Reassembles log lines from daemon frames. A frame may end mid-line (TTY
/// output especially), so the unterminated tail of each stream is held until
/// its newline arrives or the stream ends.
#[derive(Default)]
struct LineSplitter {
    pending: Vec<(LogStream, Vec<u8>)>,
}

impl LineSplitter {
    fn push(&mut self, output: LogOutput) -> Vec<StreamItem> {
        let (stream, message) = match output {
            LogOutput::StdOut { message } => (LogStream::Stdout, message),
            LogOutput::StdErr { message } => (LogStream::Stderr, message),
            LogOutput::Console { message } => (LogStream::Console, message),
            LogOutput::StdIn { .. } => return Vec::new(),
        };

        let mut buffer = self.take(stream);
        buffer.extend_from_slice(&message);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(log_item(stream, &buffer[start..end]));
            start = end + 1;
        }
        if start < buffer.len() {
            self.pending.push((stream, buffer[start..].to_vec()));
        }
        lines
    }

    /// Emit whatever is still unterminated.
    fn flush(&mut self) -> Vec<StreamItem> {
        self.pending
            .drain(..)
            .map(|(stream, tail)| log_item(stream, &tail))
            .collect()
    }

    fn take(&mut self, stream: LogStream) -> Vec<u8> {
        match self.pending.iter().position(|(s, _)| *s == stream) {
            Some(i) => self.pending.swap_remove(i).1,
            None => Vec::new(),
        }
    }
}

fn log_item(stream: LogStream, line: &[u8]) -> StreamItem {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    StreamItem::Log(LogLine {
        stream,
        message: String::from_utf8_lossy(line).into_owned(),
    })
}

fn container_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .ports
        .iter()
        .map(|(container, host)| {
            (
                format!("{}/tcp", container),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host.to_string()),
                }]),
            )
        })
        .collect();
    let binds: Vec<String> = spec.mounts.iter().map(|m| m.to_bind()).collect();
    let env = spec.env_list();

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        cmd: spec.command.clone(),
        env: (!env.is_empty()).then_some(env),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        labels: (!spec.labels.is_empty())
            .then(|| spec.labels.clone().into_iter().collect::<HashMap<_, _>>()),
        host_config: Some(HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            cap_add: (!spec.cap_add.is_empty()).then(|| spec.cap_add.clone()),
            network_mode: spec.network.clone(),
            nano_cpus: spec.nano_cpus,
            memory: spec.memory_bytes,
            auto_remove: Some(spec.auto_remove),
            privileged: Some(false),
            restart_policy: spec.restart_policy.map(|policy| RestartPolicy {
                name: Some(match policy.as_str() {
                    "always" => RestartPolicyNameEnum::ALWAYS,
                    "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
                    "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
                    _ => RestartPolicyNameEnum::NO,
                }),
                maximum_retry_count: None,
            }),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    }
}

/// Tar the build context directory into memory.
async fn archive_context(context: PathBuf) -> Result<Bytes, DaemonClientError> {
    tokio::task::spawn_blocking(move || tar_directory(&context))
        .await
        .map_err(|e| DaemonClientError::Other(format!("Context archiving task failed: {}", e)))?
}

fn tar_directory(context: &Path) -> Result<Bytes, DaemonClientError> {
    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);
    archive.append_dir_all(".", context).map_err(|e| {
        DaemonClientError::Other(format!(
            "Failed to archive build context {}: {}",
            context.display(),
            e
        ))
    })?;
    let bytes = archive
        .into_inner()
        .map_err(|e| DaemonClientError::Other(format!("Failed to finish build archive: {}", e)))?;
    Ok(Bytes::from(bytes))
}

/// Map a bollard error onto the client error classes the executor
/// understands.
fn translate(error: BollardError) -> DaemonClientError {
    match error {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => DaemonClientError::Api {
            status: status_code,
            message,
        },
        BollardError::RequestTimeoutError => DaemonClientError::TimedOut,
        BollardError::DockerStreamError { error } => DaemonClientError::Other(error),
        other if is_transport_error(&other) => DaemonClientError::Transport(other.to_string()),
        other => DaemonClientError::Other(other.to_string()),
    }
}

fn is_transport_error(error: &BollardError) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind::*;
            if matches!(
                io.kind(),
                ConnectionRefused | ConnectionReset | ConnectionAborted | NotFound | BrokenPipe
            ) {
                return true;
            }
        }
        source = err.source();
    }
    let text = error.to_string().to_ascii_lowercase();
    text.contains("connection refused")
        || text.contains("socket not found")
        || text.contains("no such file or directory")
}
