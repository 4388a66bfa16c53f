// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! In-memory daemon shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use gatehouse_core::application::build::BuildOrchestrator;
use gatehouse_core::application::compose::ComposeOrchestrator;
use gatehouse_core::application::operations::OperationCore;
use gatehouse_core::application::validation::ValidationEngine;
use gatehouse_core::domain::config::PolicySettings;
use gatehouse_core::domain::daemon::{
    DaemonCall, DaemonClient, DaemonClientError, DaemonStream, RawDaemonResponse, StreamCall,
    StreamItem,
};
use gatehouse_core::domain::project::{ProjectDescriptor, ProjectRegistry};
use gatehouse_core::domain::result::LogLine;
use gatehouse_core::infrastructure::executor::{DaemonExecutor, ExecutorSettings};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BUILT_IMAGE: &str = "sha256:feedfacecafe0123456789abcdef";

#[derive(Default)]
pub struct FakeDaemon {
    calls: Mutex<Vec<DaemonCall>>,
    streams: Mutex<Vec<StreamCall>>,
    /// name → daemon state (`running`, `exited`, `created`)
    containers: Mutex<BTreeMap<String, String>>,
    /// name → labels given at create
    labels: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    /// network name → labels
    networks: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    /// Replies consumed before the simulated behaviour applies
    script: Mutex<VecDeque<Result<RawDaemonResponse, DaemonClientError>>>,
    hang: AtomicBool,
    build_delay: Mutex<Option<Duration>>,
    push_error: Mutex<Option<String>>,
}

impl FakeDaemon {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_container(self: Arc<Self>, name: &str, state: &str) -> Arc<Self> {
        self.containers.lock().insert(name.to_string(), state.to_string());
        self
    }

    pub fn script(&self, reply: Result<RawDaemonResponse, DaemonClientError>) {
        self.script.lock().push_back(reply);
    }

    /// Every call from now on never answers.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn delay_builds(&self, delay: Duration) {
        *self.build_delay.lock() = Some(delay);
    }

    pub fn fail_pushes(&self, message: &str) {
        *self.push_error.lock() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<DaemonCall> {
        self.calls.lock().clone()
    }

    pub fn streams(&self) -> Vec<StreamCall> {
        self.streams.lock().clone()
    }

    pub fn state_of(&self, name: &str) -> Option<String> {
        self.containers.lock().get(name).cloned()
    }

    pub fn labels_of(&self, name: &str) -> BTreeMap<String, String> {
        self.labels.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.networks.lock().keys().cloned().collect()
    }

    fn label_matches(labels: &BTreeMap<String, String>, filters: &BTreeMap<String, Vec<String>>) -> bool {
        filters.get("label").map_or(true, |wanted| {
            wanted.iter().all(|w| match w.split_once('=') {
                Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
                None => labels.contains_key(w.as_str()),
            })
        })
    }

    fn not_found(id: &str) -> DaemonClientError {
        DaemonClientError::Api {
            status: 404,
            message: format!("No such container: {}", id),
        }
    }

    fn transition(&self, id: &str, from_conflict: &str, to: &str) -> Result<RawDaemonResponse, DaemonClientError> {
        let mut containers = self.containers.lock();
        let state = containers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if state.as_str() == from_conflict {
            return Err(DaemonClientError::Api {
                status: 304,
                message: String::new(),
            });
        }
        *state = to.to_string();
        Ok(RawDaemonResponse::Empty)
    }

    fn simulate(&self, call: &DaemonCall) -> Result<RawDaemonResponse, DaemonClientError> {
        match call {
            DaemonCall::Ping => Ok(RawDaemonResponse::Json(json!("OK"))),
            DaemonCall::ListContainers { all, filters } => {
                let wanted = filters.get("status").and_then(|s| s.first()).cloned();
                let labels = self.labels.lock().clone();
                let no_labels = BTreeMap::new();
                let items: Vec<Value> = self
                    .containers
                    .lock()
                    .iter()
                    .filter(|(_, state)| *all || state.as_str() == "running")
                    .filter(|(_, state)| wanted.as_deref().map_or(true, |w| w == state.as_str()))
                    .filter(|(name, _)| Self::label_matches(labels.get(*name).unwrap_or(&no_labels), filters))
                    .map(|(name, state)| {
                        json!({
                            "Id": format!("{}0000000000000000", name),
                            "Names": [format!("/{}", name)],
                            "Image": "alpine:3.20",
                            "State": state,
                            "Status": state,
                            "Labels": labels.get(name).cloned().unwrap_or_default()
                        })
                    })
                    .collect();
                Ok(RawDaemonResponse::Json(Value::Array(items)))
            }
            DaemonCall::InspectContainer { id } => {
                let state = self.containers.lock().get(id).cloned().ok_or_else(|| Self::not_found(id))?;
                let running = state == "running";
                Ok(RawDaemonResponse::Json(json!({
                    "Id": format!("{}0000000000000000", id),
                    "Name": format!("/{}", id),
                    "Config": {"Image": "alpine:3.20", "Labels": {}},
                    "State": {"Status": state, "Running": running, "ExitCode": 0},
                    "RestartCount": 0
                })))
            }
            DaemonCall::StartContainer { id } => self.transition(id, "running", "running"),
            DaemonCall::StopContainer { id, .. } => self.transition(id, "exited", "exited"),
            DaemonCall::RestartContainer { id, .. } => {
                let mut containers = self.containers.lock();
                let state = containers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
                *state = "running".to_string();
                Ok(RawDaemonResponse::Empty)
            }
            DaemonCall::RemoveContainer { id, .. } => {
                self.labels.lock().remove(id);
                self.containers
                    .lock()
                    .remove(id)
                    .map(|_| RawDaemonResponse::Empty)
                    .ok_or_else(|| Self::not_found(id))
            }
            DaemonCall::ContainerStats { id } => {
                if !self.containers.lock().contains_key(id) {
                    return Err(Self::not_found(id));
                }
                Ok(RawDaemonResponse::Json(json!({
                    "cpu_stats": {"cpu_usage": {"total_usage": 400}, "system_cpu_usage": 2000, "online_cpus": 2},
                    "precpu_stats": {"cpu_usage": {"total_usage": 200}, "system_cpu_usage": 1000},
                    "memory_stats": {"usage": 512, "limit": 2048},
                    "networks": {"eth0": {"rx_bytes": 10, "tx_bytes": 20}}
                })))
            }
            DaemonCall::CreateContainer { spec } => {
                let name = spec.name.clone().unwrap_or_else(|| "generated".to_string());
                let mut containers = self.containers.lock();
                if containers.contains_key(&name) {
                    return Err(DaemonClientError::Api {
                        status: 409,
                        message: format!("Conflict. The container name \"/{}\" is already in use", name),
                    });
                }
                containers.insert(name.clone(), "created".to_string());
                self.labels.lock().insert(name.clone(), spec.labels.clone().into_iter().collect());
                Ok(RawDaemonResponse::Json(json!({"Id": name, "Warnings": []})))
            }
            DaemonCall::ListImages { .. } => Ok(RawDaemonResponse::Json(json!([
                {"Id": BUILT_IMAGE, "RepoTags": ["ocr:latest"], "Size": 1024, "Created": 1700000000}
            ]))),
            DaemonCall::InspectImage { id } => Ok(RawDaemonResponse::Json(json!({"Id": id}))),
            DaemonCall::RemoveImage { id, .. } => {
                Ok(RawDaemonResponse::Json(json!([{"Untagged": id}, {"Deleted": BUILT_IMAGE}])))
            }
            DaemonCall::TagImage { .. } => Ok(RawDaemonResponse::Empty),
            DaemonCall::CreateNetwork { name, labels, .. } => {
                let mut networks = self.networks.lock();
                if networks.contains_key(name) {
                    return Err(DaemonClientError::Api {
                        status: 409,
                        message: format!("network with name {} already exists", name),
                    });
                }
                networks.insert(name.clone(), labels.clone());
                Ok(RawDaemonResponse::Json(json!({"Id": format!("net-{}", name), "Warning": ""})))
            }
            DaemonCall::ListNetworks { filters } => {
                let items: Vec<Value> = self
                    .networks
                    .lock()
                    .iter()
                    .filter(|(_, labels)| Self::label_matches(labels, filters))
                    .map(|(name, labels)| json!({"Name": name, "Id": format!("net-{}", name), "Labels": labels}))
                    .collect();
                Ok(RawDaemonResponse::Json(Value::Array(items)))
            }
            DaemonCall::RemoveNetwork { id } => self
                .networks
                .lock()
                .remove(id)
                .map(|_| RawDaemonResponse::Empty)
                .ok_or_else(|| DaemonClientError::Api {
                    status: 404,
                    message: format!("network {} not found", id),
                }),
        }
    }
}

#[async_trait]
impl DaemonClient for FakeDaemon {
    async fn call(&self, call: DaemonCall) -> Result<RawDaemonResponse, DaemonClientError> {
        self.calls.lock().push(call.clone());
        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(reply) => reply,
            None => self.simulate(&call),
        }
    }

    async fn open_stream(&self, call: StreamCall) -> Result<DaemonStream, DaemonClientError> {
        self.streams.lock().push(call.clone());
        match call {
            StreamCall::Logs { id, options } => {
                if !self.containers.lock().contains_key(&id) {
                    return Err(Self::not_found(&id));
                }
                let lines: Vec<Result<StreamItem, DaemonClientError>> = (1..=3)
                    .map(|i| Ok(StreamItem::Log(LogLine::stdout(format!("line {}", i)))))
                    .collect();
                if options.follow {
                    Ok(stream::iter(lines).chain(stream::pending()).boxed())
                } else {
                    Ok(stream::iter(lines).boxed())
                }
            }
            StreamCall::PullImage { image, tag } => Ok(stream::iter(vec![
                Ok(StreamItem::Progress(json!({"status": format!("Pulling from {}", image), "id": tag}))),
                Ok(StreamItem::Progress(json!({"status": "Download complete", "id": "a1b2c3"}))),
                Ok(StreamItem::Progress(json!({"status": format!("Status: Downloaded newer image for {}:{}", image, tag)}))),
            ])
            .boxed()),
            StreamCall::BuildImage { .. } => {
                let delay = *self.build_delay.lock();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(stream::iter(vec![
                    Ok(StreamItem::Progress(json!({"stream": "Step 1/2 : FROM alpine:3.20\n"}))),
                    Ok(StreamItem::Progress(json!({"stream": "Step 2/2 : COPY . /app\n"}))),
                    Ok(StreamItem::Progress(json!({"aux": {"ID": BUILT_IMAGE}}))),
                ])
                .boxed())
            }
            StreamCall::PushImage { tag, .. } => {
                let error = self.push_error.lock().clone();
                let last = match error {
                    Some(message) => json!({"errorDetail": {"message": message}, "error": message}),
                    None => json!({"status": format!("{}: digest: sha256:0123 size: 528", tag)}),
                };
                Ok(stream::iter(vec![
                    Ok(StreamItem::Progress(json!({"status": "Preparing", "id": "a1b2c3"}))),
                    Ok(StreamItem::Progress(last)),
                ])
                .boxed())
            }
        }
    }
}

pub fn settings() -> ExecutorSettings {
    ExecutorSettings {
        call_timeout: Duration::from_secs(2),
        max_retries: 2,
        retry_backoff: Duration::from_millis(10),
        stream_idle_timeout: Duration::from_secs(5),
        stream_buffer: 8,
    }
}

pub fn policy() -> PolicySettings {
    PolicySettings {
        allowed_mount_roots: vec![PathBuf::from("/srv/data")],
        ..Default::default()
    }
}

pub fn projects() -> Vec<ProjectDescriptor> {
    let mut ocr = ProjectDescriptor::new("ocr", "/projects/ocr");
    ocr.deploy.container_name = Some("ocr-service".to_string());
    ocr.deploy.ports.insert(8000, 18000);
    ocr.deploy.env.insert("OCR_LANG".to_string(), "eng".to_string());
    ocr.deploy.restart_policy = Some("unless-stopped".to_string());
    vec![ocr, ProjectDescriptor::new("web", "/projects/web")]
}

pub struct Stack {
    pub daemon: Arc<FakeDaemon>,
    pub executor: Arc<DaemonExecutor>,
    pub core: Arc<OperationCore>,
    pub builds: BuildOrchestrator,
    pub compose: ComposeOrchestrator,
}

pub fn stack(daemon: Arc<FakeDaemon>) -> Stack {
    let engine = ValidationEngine::new(policy(), Arc::new(ProjectRegistry::new(projects())), None);
    let executor = Arc::new(DaemonExecutor::new(daemon.clone(), settings()));
    let core = Arc::new(OperationCore::new(Arc::new(engine), executor.clone()));
    let builds = BuildOrchestrator::new(core.clone(), 16);
    let compose = ComposeOrchestrator::new(core.clone());
    Stack {
        daemon,
        executor,
        core,
        builds,
        compose,
    }
}
