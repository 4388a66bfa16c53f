// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Operation Core
//!
//! Container and image operations: every request is admitted by the
//! [`ValidationEngine`] and only then handed to the [`DaemonExecutor`].
//! Daemon replies are normalized into the result model before they leave
//! this module.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Validate, execute and shape container/image operations

use crate::application::streaming::{Next, OperationStream, Relay};
use crate::application::validation::ValidationEngine;
use crate::domain::daemon::{DaemonCall, RawDaemonResponse, StreamCall, StreamItem};
use crate::domain::fault::{DaemonFault, OperationFault};
use crate::domain::operation::{ContainerCommand, ContainerSpec, LogOptions, PullSpec, ValidatedOperation};
use crate::domain::policy::{PolicyViolation, ValidationVerdict};
use crate::domain::request::{
    ContainerActionKind, ContainerFilter, ImageActionKind, OperationRequest, OptionMap, OptionValue,
};
use crate::domain::result::{
    ContainerDetails, ContainerStatus, ContainerSummary, ImageSummary, LogLine, OperationResult,
    ProgressEvent, ResultDetails, StatsSnapshot,
};
use crate::infrastructure::executor::DaemonExecutor;
use crate::infrastructure::metrics;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Item of a pull stream: progress records, then the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PullEvent {
    Progress(ProgressEvent),
    Done(OperationResult),
}

pub struct OperationCore {
    validation: Arc<ValidationEngine>,
    executor: Arc<DaemonExecutor>,
}

impl OperationCore {
    pub fn new(validation: Arc<ValidationEngine>, executor: Arc<DaemonExecutor>) -> Self {
        Self {
            validation,
            executor,
        }
    }

    pub fn validation(&self) -> &ValidationEngine {
        &self.validation
    }

    pub fn executor(&self) -> &Arc<DaemonExecutor> {
        &self.executor
    }

    pub fn validate(&self, request: &OperationRequest) -> ValidationVerdict {
        self.validation.validate(request)
    }

    /// Admit `request`, logging and counting a rejection.
    pub(crate) fn admit(&self, request: &OperationRequest) -> Result<ValidatedOperation, OperationFault> {
        self.validation
            .admit(request)
            .map_err(|violation| self.rejected(&request.label(), request.target(), violation))
    }

    pub(crate) fn rejected(&self, operation: &str, target: &str, violation: PolicyViolation) -> OperationFault {
        warn!(
            operation,
            subject = target,
            reason = violation.kind.as_str(),
            detail = %violation.detail,
            "Operation rejected by policy"
        );
        metrics::record_rejection(violation.kind.as_str());
        violation.into()
    }

    pub async fn ping(&self) -> Result<(), OperationFault> {
        Ok(self.executor.ping().await?)
    }

    pub async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>, OperationFault> {
        self.validation
            .admit_filter(filter)
            .map_err(|violation| self.rejected("container.list", "", violation))?;

        let mut filters: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(status) = &filter.status {
            filters.insert("status".to_string(), vec![status.clone()]);
        }
        if let Some(label) = &filter.label {
            filters.insert("label".to_string(), vec![label.clone()]);
        }
        if let Some(name) = &filter.name {
            filters.insert("name".to_string(), vec![name.clone()]);
        }

        let response = self
            .executor
            .execute(DaemonCall::ListContainers {
                all: filter.all || filter.status.is_some(),
                filters,
            })
            .await?;
        Ok(json_array(response)
            .iter()
            .filter_map(ContainerSummary::from_raw)
            .collect())
    }

    pub async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, OperationFault> {
        let request = OperationRequest::container(id, ContainerActionKind::Inspect);
        match self.admit(&request)? {
            ValidatedOperation::Container { id, .. } => self.inspect(&id).await,
            other => Err(unexpected(&other)),
        }
    }

    /// Run a lifecycle action and report the state observed afterwards.
    pub async fn container_action(
        &self,
        id: &str,
        kind: ContainerActionKind,
        options: OptionMap,
    ) -> Result<OperationResult, OperationFault> {
        self.execute(OperationRequest::container(id, kind).with_options(options))
            .await
    }

    /// Log lines of a container.
    ///
    /// Without `follow` the stream ends after the last `tail` lines. With
    /// `follow` it stays open until the container stops, the daemon closes
    /// it or `cancel` fires.
    pub async fn container_logs(
        &self,
        id: &str,
        tail: Option<u32>,
        follow: bool,
        cancel: CancellationToken,
    ) -> Result<OperationStream<LogLine>, OperationFault> {
        let mut options = OptionMap::new();
        if let Some(tail) = tail {
            options.insert("tail".to_string(), OptionValue::from(tail));
        }
        options.insert("follow".to_string(), OptionValue::from(follow));
        self.container_logs_with(id, options, cancel).await
    }

    /// Log stream with the full option set (`tail`, `follow`, `timestamps`,
    /// `since`).
    pub async fn container_logs_with(
        &self,
        id: &str,
        options: OptionMap,
        cancel: CancellationToken,
    ) -> Result<OperationStream<LogLine>, OperationFault> {
        let request = OperationRequest::container(id, ContainerActionKind::Logs).with_options(options);
        let (id, options) = match self.admit(&request)? {
            ValidatedOperation::Container {
                id,
                command: ContainerCommand::Logs(options),
            } => (id, options),
            other => return Err(unexpected(&other)),
        };
        self.spawn_log_relay(id, options, cancel).await
    }

    async fn spawn_log_relay(
        &self,
        id: String,
        options: LogOptions,
        cancel: CancellationToken,
    ) -> Result<OperationStream<LogLine>, OperationFault> {
        let follow = options.follow;
        let mut stream = self
            .executor
            .open_stream(StreamCall::Logs {
                id: id.clone(),
                options,
            })
            .await?;

        let settings = self.executor.settings().clone();
        let (relay, out) = Relay::channel(settings.stream_buffer, cancel);
        let executor = self.executor.clone();

        tokio::spawn(async move {
            let mut delivered = 0usize;
            loop {
                match relay.next_from(&mut stream, Some(settings.stream_idle_timeout)).await {
                    Next::Item(StreamItem::Log(line)) => {
                        if !relay.send(Ok(line)).await {
                            break;
                        }
                        delivered += 1;
                    }
                    Next::Item(StreamItem::Progress(_)) => {}
                    Next::Fault(fault) => {
                        relay.send(Err(fault)).await;
                        break;
                    }
                    Next::End | Next::Cancelled => break,
                    Next::Idle if follow => {
                        // A quiet follow stream only ends once the container does.
                        match executor
                            .execute(DaemonCall::InspectContainer { id: id.clone() })
                            .await
                        {
                            Ok(response) => {
                                let stopped = response
                                    .json()
                                    .and_then(ContainerDetails::from_raw)
                                    .map(|details| details.state.is_terminal())
                                    .unwrap_or(false);
                                if stopped {
                                    break;
                                }
                            }
                            Err(DaemonFault::NotFound { .. }) => break,
                            Err(fault) => {
                                relay.send(Err(fault.into())).await;
                                break;
                            }
                        }
                    }
                    Next::Idle => {
                        relay
                            .send(Err(DaemonFault::timeout("logs", settings.stream_idle_timeout).into()))
                            .await;
                        break;
                    }
                }
            }
            debug!(container = %id, lines = delivered, detached = relay.is_detached(), "Log stream finished");
        });

        Ok(out)
    }

    /// Point-in-time resource usage from one daemon sample.
    pub async fn container_stats(&self, id: &str) -> Result<StatsSnapshot, OperationFault> {
        let request = OperationRequest::container(id, ContainerActionKind::Stats);
        match self.admit(&request)? {
            ValidatedOperation::Container { id, .. } => self.stats(&id).await,
            other => Err(unexpected(&other)),
        }
    }

    pub async fn create_container(&self, image: &str, options: OptionMap) -> Result<OperationResult, OperationFault> {
        self.execute(OperationRequest::container(image, ContainerActionKind::Create).with_options(options))
            .await
    }

    /// Create a container and start it.
    pub async fn run_container(&self, image: &str, options: OptionMap) -> Result<OperationResult, OperationFault> {
        self.execute(OperationRequest::container(image, ContainerActionKind::Run).with_options(options))
            .await
    }

    /// Pull or remove an image. A pull is driven to completion and only its
    /// final result is returned.
    pub async fn image_action(
        &self,
        id: &str,
        kind: ImageActionKind,
        options: OptionMap,
    ) -> Result<OperationResult, OperationFault> {
        self.execute(OperationRequest::image(id, kind).with_options(options))
            .await
    }

    /// Pull an image, streaming progress. The terminal item is
    /// [`PullEvent::Done`].
    pub async fn pull_image(
        &self,
        image: &str,
        options: OptionMap,
        cancel: CancellationToken,
    ) -> Result<OperationStream<PullEvent>, OperationFault> {
        let request = OperationRequest::image(image, ImageActionKind::Pull).with_options(options);
        match self.admit(&request)? {
            ValidatedOperation::PullImage(spec) => self.spawn_pull_relay(spec, cancel).await,
            other => Err(unexpected(&other)),
        }
    }

    async fn spawn_pull_relay(
        &self,
        spec: PullSpec,
        cancel: CancellationToken,
    ) -> Result<OperationStream<PullEvent>, OperationFault> {
        let reference = spec.reference();
        let mut stream = self
            .executor
            .open_stream(StreamCall::PullImage {
                image: spec.image,
                tag: spec.tag,
            })
            .await?;

        let settings = self.executor.settings().clone();
        let (relay, out) = Relay::channel(settings.stream_buffer, cancel);

        tokio::spawn(async move {
            let mut events = 0usize;
            loop {
                match relay.next_from(&mut stream, Some(settings.stream_idle_timeout)).await {
                    Next::Item(StreamItem::Progress(raw)) => {
                        let event = ProgressEvent::from_raw(&raw);
                        if let Some(error) = &event.error {
                            warn!(image = %reference, error = %error, "Image pull failed");
                            relay.send(Err(OperationFault::upstream(error.clone()))).await;
                            break;
                        }
                        events += 1;
                        if !relay.send(Ok(PullEvent::Progress(event))).await {
                            break;
                        }
                    }
                    Next::Item(StreamItem::Log(_)) => {}
                    Next::Fault(fault) => {
                        relay.send(Err(fault)).await;
                        break;
                    }
                    Next::Idle => {
                        relay
                            .send(Err(DaemonFault::timeout("pull_image", settings.stream_idle_timeout).into()))
                            .await;
                        break;
                    }
                    Next::End => {
                        info!(image = %reference, events, "Image pulled");
                        let result = OperationResult::new("image.pull", reference.clone(), "pulled")
                            .with_details(ResultDetails::Pull {
                                reference: reference.clone(),
                                events,
                            });
                        relay.send(Ok(PullEvent::Done(result))).await;
                        break;
                    }
                    Next::Cancelled => break,
                }
            }
        });

        Ok(out)
    }

    pub async fn list_images(&self) -> Result<Vec<ImageSummary>, OperationFault> {
        let response = self.executor.execute(DaemonCall::ListImages { all: false }).await?;
        Ok(json_array(response)
            .iter()
            .filter_map(ImageSummary::from_raw)
            .collect())
    }

    /// Route any container or image request through validation and
    /// execution. Builds are run by the build orchestrator.
    pub async fn execute(&self, request: OperationRequest) -> Result<OperationResult, OperationFault> {
        let label = request.label();
        match self.admit(&request)? {
            ValidatedOperation::Container { id, command } => self.container_command(&label, id, command).await,
            ValidatedOperation::CreateContainer { spec, start } => {
                self.create(&label, spec, start).await.map(|(result, _)| result)
            }
            ValidatedOperation::PullImage(spec) => self.pull_to_completion(spec).await,
            ValidatedOperation::RemoveImage { id, force } => {
                let response = self
                    .executor
                    .execute(DaemonCall::RemoveImage { id: id.clone(), force })
                    .await?;
                let (removed, untagged) = image_delete_report(&response);
                info!(image = %id, removed = removed.len(), untagged = untagged.len(), "Image removed");
                Ok(OperationResult::new(label, id, "removed")
                    .with_details(ResultDetails::Image { removed, untagged }))
            }
            ValidatedOperation::Build(plan) => Err(self.rejected(
                &label,
                &plan.project,
                PolicyViolation::out_of_range("build requests are run by the build orchestrator"),
            )),
        }
    }

    /// Create (and optionally start) a container from an admitted spec;
    /// returns the result and the new container id.
    pub(crate) async fn create(
        &self,
        label: &str,
        spec: ContainerSpec,
        start: bool,
    ) -> Result<(OperationResult, String), OperationFault> {
        let image = spec.image.clone();
        let response = self.executor.execute(DaemonCall::CreateContainer { spec }).await?;
        let id = response
            .json()
            .and_then(|raw| raw.get("Id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OperationFault::upstream("create response carried no container id"))?;
        let warnings: Vec<String> = response
            .json()
            .and_then(|raw| raw.get("Warnings"))
            .and_then(Value::as_array)
            .map(|w| w.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        for warning in &warnings {
            warn!(container = %id, warning = %warning, "Daemon warning on create");
        }
        info!(container = %id, image = %image, "Container created");

        let status = if start {
            self.executor
                .execute(DaemonCall::StartContainer { id: id.clone() })
                .await?;
            self.observe(&id, ContainerStatus::Running).await
        } else {
            ContainerStatus::Created
        };

        let result = OperationResult::new(label, id.clone(), status.as_str())
            .with_details(ResultDetails::Created { warnings });
        Ok((result, id))
    }

    async fn container_command(
        &self,
        label: &str,
        id: String,
        command: ContainerCommand,
    ) -> Result<OperationResult, OperationFault> {
        let (call, expected) = match &command {
            ContainerCommand::Start => (DaemonCall::StartContainer { id: id.clone() }, ContainerStatus::Running),
            ContainerCommand::Stop { timeout_secs } => (
                DaemonCall::StopContainer {
                    id: id.clone(),
                    timeout_secs: *timeout_secs,
                },
                ContainerStatus::Stopped,
            ),
            ContainerCommand::Restart { timeout_secs } => (
                DaemonCall::RestartContainer {
                    id: id.clone(),
                    timeout_secs: *timeout_secs,
                },
                ContainerStatus::Running,
            ),
            ContainerCommand::Remove { force, volumes } => (
                DaemonCall::RemoveContainer {
                    id: id.clone(),
                    force: *force,
                    volumes: *volumes,
                },
                ContainerStatus::Removed,
            ),
            ContainerCommand::Logs(options) => {
                let mut options = options.clone();
                options.follow = false;
                let lines: Vec<LogLine> = self
                    .spawn_log_relay(id.clone(), options, CancellationToken::new())
                    .await?
                    .collect::<Vec<_>>()
                    .await
                    .into_iter()
                    .collect::<Result<_, _>>()?;
                return Ok(OperationResult::new(label, id, "ok").with_details(ResultDetails::Logs { lines }));
            }
            ContainerCommand::Stats => {
                let stats = self.stats(&id).await?;
                return Ok(OperationResult::new(label, id, "ok").with_details(ResultDetails::Stats(stats)));
            }
            ContainerCommand::Inspect => {
                let details = self.inspect(&id).await?;
                let status = details.state.as_str();
                return Ok(OperationResult::new(label, id, status).with_details(ResultDetails::Container(details)));
            }
        };

        self.executor.execute(call).await?;
        info!(container = %id, action = command.name(), "Container action completed");

        if expected == ContainerStatus::Removed {
            return Ok(OperationResult::new(label, id, ContainerStatus::Removed.as_str()));
        }

        match self.inspect(&id).await {
            Ok(details) => {
                let status = details.state.as_str();
                Ok(OperationResult::new(label, id, status).with_details(ResultDetails::Container(details)))
            }
            Err(fault) => {
                let status = if fault.is_not_found() {
                    // auto_remove containers vanish once stopped
                    ContainerStatus::Removed
                } else {
                    warn!(container = %id, error = %fault, "Could not observe container after action");
                    expected
                };
                Ok(OperationResult::new(label, id, status.as_str()))
            }
        }
    }

    async fn observe(&self, id: &str, fallback: ContainerStatus) -> ContainerStatus {
        match self.inspect(id).await {
            Ok(details) => details.state,
            Err(fault) => {
                warn!(container = %id, error = %fault, "Could not observe container state");
                fallback
            }
        }
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, OperationFault> {
        let response = self
            .executor
            .execute(DaemonCall::InspectContainer { id: id.to_string() })
            .await?;
        response
            .json()
            .and_then(ContainerDetails::from_raw)
            .ok_or_else(|| OperationFault::upstream(format!("malformed inspect response for {}", id)))
    }

    async fn stats(&self, id: &str) -> Result<StatsSnapshot, OperationFault> {
        let response = self
            .executor
            .execute(DaemonCall::ContainerStats { id: id.to_string() })
            .await?;
        let raw = response
            .json()
            .ok_or_else(|| OperationFault::upstream(format!("empty stats response for {}", id)))?;
        Ok(StatsSnapshot::from_raw(id, raw))
    }

    async fn pull_to_completion(&self, spec: PullSpec) -> Result<OperationResult, OperationFault> {
        let mut stream = self.spawn_pull_relay(spec, CancellationToken::new()).await?;
        while let Some(event) = stream.next().await {
            if let PullEvent::Done(result) = event? {
                return Ok(result);
            }
        }
        Err(OperationFault::upstream("pull stream ended without a result"))
    }
}

fn json_array(response: RawDaemonResponse) -> Vec<Value> {
    match response.into_json() {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// `(deleted, untagged)` from a `DELETE /images/{id}` reply.
fn image_delete_report(response: &RawDaemonResponse) -> (Vec<String>, Vec<String>) {
    let mut removed = Vec::new();
    let mut untagged = Vec::new();
    if let Some(items) = response.json().and_then(Value::as_array) {
        for item in items {
            if let Some(id) = item.get("Deleted").and_then(Value::as_str) {
                removed.push(id.to_string());
            }
            if let Some(tag) = item.get("Untagged").and_then(Value::as_str) {
                untagged.push(tag.to_string());
            }
        }
    }
    (removed, untagged)
}

fn unexpected(operation: &ValidatedOperation) -> OperationFault {
    OperationFault::upstream(format!("unexpected validated operation: {:?}", operation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_delete_report() {
        let response = RawDaemonResponse::Json(json!([
            {"Untagged": "redis:7"},
            {"Deleted": "sha256:abc"},
            {"Deleted": "sha256:def"}
        ]));
        let (removed, untagged) = image_delete_report(&response);
        assert_eq!(removed, vec!["sha256:abc", "sha256:def"]);
        assert_eq!(untagged, vec!["redis:7"]);
    }

    #[test]
    fn test_json_array_tolerates_non_arrays() {
        assert!(json_array(RawDaemonResponse::Empty).is_empty());
        assert_eq!(json_array(RawDaemonResponse::Json(json!([1, 2]))).len(), 2);
    }
}
