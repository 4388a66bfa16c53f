// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Wires the core services from a loaded configuration.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use gatehouse_core::application::build::BuildOrchestrator;
use gatehouse_core::application::compose::ComposeOrchestrator;
use gatehouse_core::application::operations::OperationCore;
use gatehouse_core::application::validation::ValidationEngine;
use gatehouse_core::domain::config::GatewayConfigManifest;
use gatehouse_core::infrastructure::docker::BollardDaemonClient;
use gatehouse_core::infrastructure::executor::{DaemonExecutor, ExecutorSettings};
use gatehouse_core::infrastructure::metrics::register_gateway_metrics;

/// Services shared by every command of one CLI invocation.
pub struct Gateway {
    pub core: Arc<OperationCore>,
    pub builds: BuildOrchestrator,
    pub compose: ComposeOrchestrator,
}

impl Gateway {
    /// Connect to the configured daemon endpoint. Nothing is sent to the
    /// daemon until the first operation.
    pub fn connect(config: &GatewayConfigManifest) -> Result<Self> {
        let endpoint = &config.spec.daemon.endpoint;
        let client = BollardDaemonClient::connect(endpoint)
            .with_context(|| format!("Failed to configure daemon client for {}", endpoint))?;
        Ok(Self::with_executor(
            config,
            DaemonExecutor::new(Arc::new(client), ExecutorSettings::from(&config.spec.daemon)),
        ))
    }

    pub fn with_executor(config: &GatewayConfigManifest, executor: DaemonExecutor) -> Self {
        register_gateway_metrics();

        let validation = Arc::new(ValidationEngine::from_config(config));
        let core = Arc::new(OperationCore::new(validation, Arc::new(executor)));
        let builds = BuildOrchestrator::new(core.clone(), config.spec.builds.history);
        let compose = ComposeOrchestrator::new(core.clone());
        debug!(
            projects = config.spec.projects.len(),
            endpoint = %config.spec.daemon.endpoint,
            "Gateway services ready"
        );

        Self {
            core,
            builds,
            compose,
        }
    }
}
