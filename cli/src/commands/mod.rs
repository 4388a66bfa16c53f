// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Gatehouse CLI

pub mod build;
pub mod compose;
pub mod config;
pub mod containers;
pub mod images;
pub mod ping;
pub mod projects;

pub use self::build::BuildArgs;
pub use self::compose::ComposeCommand;
pub use self::config::ConfigCommand;
pub use self::containers::ContainerCommand;
pub use self::images::ImageCommand;
pub use self::projects::ProjectCommand;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use gatehouse_core::domain::config::GatewayConfigManifest;

use crate::gateway::Gateway;

/// Global flags every command sees.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub config_path: Option<PathBuf>,
    pub json: bool,
}

impl CommandContext {
    pub fn load_config(&self) -> Result<GatewayConfigManifest> {
        let config = GatewayConfigManifest::load_or_default(self.config_path.clone())
            .context("Failed to load configuration")?;
        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }

    pub fn gateway(&self) -> Result<Gateway> {
        Gateway::connect(&self.load_config()?)
    }
}

/// Token cancelled on Ctrl-C, so streaming commands detach cleanly.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}
