// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Compose Orchestrator
//!
//! Brings a compose project up and down on the single daemon. Each service
//! is admitted as an ordinary `run` request named `{project}-{service}`;
//! the whole project is admitted before the daemon is touched, after which
//! daemon faults are collected per service instead of aborting the rest.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Deploy, inspect and tear down labelled service groups

use crate::application::operations::OperationCore;
use crate::domain::compose::{
    container_name, ComposeDownReport, ComposeFile, ComposeUpReport, DeployedService,
    ServiceContainer, ServiceLogs, NETWORK_LABEL, PROJECT_LABEL, SERVICE_LABEL,
};
use crate::domain::daemon::{DaemonCall, RawDaemonResponse};
use crate::domain::fault::{DaemonFault, OperationFault};
use crate::domain::operation::{ContainerSpec, ValidatedOperation};
use crate::domain::policy::PolicyViolation;
use crate::domain::request::{ContainerActionKind, ContainerFilter, OptionMap, OptionValue};
use crate::domain::result::{ContainerStatus, ContainerSummary};
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines per service when `logs` is not given a tail.
pub const DEFAULT_LOG_TAIL: u32 = 100;

#[derive(Clone)]
pub struct ComposeOrchestrator {
    core: Arc<OperationCore>,
}

impl ComposeOrchestrator {
    pub fn new(core: Arc<OperationCore>) -> Self {
        Self { core }
    }

    /// Deploy `services` (all when empty, plus their dependencies).
    ///
    /// Any policy rejection refuses the whole project before a network or
    /// container is created. Existing service containers are replaced.
    pub async fn up(
        &self,
        project: &str,
        file: &ComposeFile,
        services: &[String],
    ) -> Result<ComposeUpReport, OperationFault> {
        self.check_project("compose.up", project)?;
        let reject = |violation: PolicyViolation| self.core.rejected("compose.up", project, violation);

        let order = file.deploy_order(services).map_err(reject)?;
        let networks = file.project_networks(project, &order).map_err(reject)?;

        let mut admitted: Vec<(String, ContainerSpec)> = Vec::with_capacity(order.len());
        for service in &order {
            let definition = &file.services[service];
            let ignored = definition.ignored_keys();
            if !ignored.is_empty() {
                debug!(project, service = %service, keys = ?ignored, "Ignoring compose keys without effect");
            }

            let network = file.service_network(project, service).map_err(reject)?;
            let request = definition
                .request(project, service, network.as_deref())
                .map_err(reject)?;
            match self.core.validation().admit(&request) {
                Ok(ValidatedOperation::CreateContainer { spec, .. }) => admitted.push((service.clone(), spec)),
                Ok(other) => {
                    return Err(OperationFault::upstream(format!(
                        "unexpected validated operation: {:?}",
                        other
                    )))
                }
                Err(violation) => {
                    let detail = format!("service '{}': {}", service, violation.detail);
                    return Err(reject(PolicyViolation::new(violation.kind, detail)));
                }
            }
        }

        let mut report = ComposeUpReport {
            project: project.to_string(),
            ..Default::default()
        };

        for network in networks.iter().filter(|n| !n.external) {
            let labels = BTreeMap::from([
                (PROJECT_LABEL.to_string(), project.to_string()),
                (NETWORK_LABEL.to_string(), network.key.clone()),
            ]);
            let call = DaemonCall::CreateNetwork {
                name: network.name.clone(),
                driver: network.driver.clone(),
                labels,
            };
            match self.core.executor().execute(call).await {
                Ok(_) => {
                    info!(project, network = %network.name, "Network created");
                    report.networks.push(network.name.clone());
                }
                Err(DaemonFault::Conflict { .. }) => {
                    debug!(project, network = %network.name, "Network already exists");
                    report.networks.push(network.name.clone());
                }
                Err(fault) => {
                    warn!(project, network = %network.name, error = %fault, "Network creation failed");
                    report.errors.push(format!("network {}: {}", network.name, fault));
                }
            }
        }

        for (service, spec) in admitted {
            let name = container_name(project, &service);
            match self.replace(&name, spec).await {
                Ok((container_id, status)) => report.deployed.push(DeployedService {
                    service,
                    container_id,
                    container_name: name,
                    status,
                }),
                Err(fault) => {
                    warn!(project, service = %service, error = %fault, "Service deployment failed");
                    report.errors.push(format!("service {}: {}", service, fault));
                }
            }
        }

        info!(
            project,
            deployed = report.deployed.len(),
            errors = report.errors.len(),
            "Compose project up"
        );
        Ok(report)
    }

    /// Stop and remove every container and network labelled with `project`.
    pub async fn down(&self, project: &str, remove_volumes: bool) -> Result<ComposeDownReport, OperationFault> {
        self.check_project("compose.down", project)?;
        let mut report = ComposeDownReport {
            project: project.to_string(),
            ..Default::default()
        };

        for container in self.containers(project).await? {
            let target = container_target(&container);
            if container.state == ContainerStatus::Running {
                if let Err(fault) = self
                    .core
                    .container_action(&target, ContainerActionKind::Stop, OptionMap::new())
                    .await
                {
                    report.errors.push(format!("stop {}: {}", target, fault));
                    continue;
                }
            }

            let mut options = OptionMap::new();
            options.insert("volumes".to_string(), OptionValue::Bool(remove_volumes));
            match self
                .core
                .container_action(&target, ContainerActionKind::Remove, options)
                .await
            {
                Ok(_) => report.removed_containers.push(target),
                // auto_remove containers are gone once stopped
                Err(fault) if fault.is_not_found() => report.removed_containers.push(target),
                Err(fault) => report.errors.push(format!("remove {}: {}", target, fault)),
            }
        }

        let response = self
            .core
            .executor()
            .execute(DaemonCall::ListNetworks {
                filters: project_filter(project),
            })
            .await?;
        for name in network_names(&response) {
            match self
                .core
                .executor()
                .execute(DaemonCall::RemoveNetwork { id: name.clone() })
                .await
            {
                Ok(_) | Err(DaemonFault::NotFound { .. }) => report.removed_networks.push(name),
                Err(fault) => report.errors.push(format!("network {}: {}", name, fault)),
            }
        }

        info!(
            project,
            containers = report.removed_containers.len(),
            networks = report.removed_networks.len(),
            errors = report.errors.len(),
            "Compose project down"
        );
        Ok(report)
    }

    /// Containers of `project`, ordered by service.
    pub async fn ps(&self, project: &str) -> Result<Vec<ServiceContainer>, OperationFault> {
        self.check_project("compose.ps", project)?;
        let mut containers: Vec<ServiceContainer> = self
            .containers(project)
            .await?
            .into_iter()
            .map(|c| ServiceContainer {
                service: c
                    .labels
                    .get(SERVICE_LABEL)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                name: container_target(&c),
                id: c.id,
                image: c.image,
                state: c.state,
                status: c.status,
            })
            .collect();
        containers.sort_by(|a, b| a.service.cmp(&b.service).then_with(|| a.name.cmp(&b.name)));
        Ok(containers)
    }

    /// Recent log lines per service container. A container whose logs
    /// cannot be read is reported with its fault instead of failing the
    /// whole call.
    pub async fn logs(
        &self,
        project: &str,
        services: &[String],
        tail: Option<u32>,
    ) -> Result<Vec<ServiceLogs>, OperationFault> {
        let tail = tail.unwrap_or(DEFAULT_LOG_TAIL);
        let mut logs = Vec::new();

        for container in self.ps(project).await? {
            if !services.is_empty() && !services.contains(&container.service) {
                continue;
            }
            let lines = match self
                .core
                .container_logs(&container.name, Some(tail), false, CancellationToken::new())
                .await
            {
                Ok(stream) => stream.collect::<Vec<_>>().await.into_iter().collect::<Result<Vec<_>, _>>(),
                Err(fault) => Err(fault),
            };
            let (lines, error) = match lines {
                Ok(lines) => (lines, None),
                Err(fault) => (Vec::new(), Some(fault.to_string())),
            };
            logs.push(ServiceLogs {
                service: container.service,
                container: container.name,
                lines,
                error,
            });
        }
        Ok(logs)
    }

    fn check_project(&self, operation: &str, project: &str) -> Result<(), OperationFault> {
        self.core
            .validation()
            .check_compose_project(project)
            .map_err(|violation| self.core.rejected(operation, project, violation))
    }

    async fn containers(&self, project: &str) -> Result<Vec<ContainerSummary>, OperationFault> {
        let filter = ContainerFilter::all().with_label(format!("{}={}", PROJECT_LABEL, project));
        self.core.list_containers(&filter).await
    }

    /// Remove the previous service container, then create and start the
    /// new one. Returns its id and observed status.
    async fn replace(&self, name: &str, spec: ContainerSpec) -> Result<(String, String), OperationFault> {
        match self
            .core
            .executor()
            .execute(DaemonCall::RemoveContainer {
                id: name.to_string(),
                force: true,
                volumes: false,
            })
            .await
        {
            Ok(_) => info!(container = %name, "Removed previous service container"),
            Err(DaemonFault::NotFound { .. }) => {}
            Err(fault) => return Err(fault.into()),
        }

        let (result, id) = self.core.create("compose.up", spec, true).await?;
        Ok((id, result.status))
    }
}

fn container_target(container: &ContainerSummary) -> String {
    if container.name.is_empty() {
        container.id.clone()
    } else {
        container.name.clone()
    }
}

fn project_filter(project: &str) -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([(
        "label".to_string(),
        vec![format!("{}={}", PROJECT_LABEL, project)],
    )])
}

fn network_names(response: &RawDaemonResponse) -> Vec<String> {
    response
        .json()
        .and_then(Value::as_array)
        .map(|networks| {
            networks
                .iter()
                .filter_map(|n| n.get("Name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
