// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Container operations
//!
//! Commands: list, inspect, start, stop, restart, rm, logs, stats, create, run

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use futures::StreamExt;
use tracing::debug;

use gatehouse_core::application::operations::OperationCore;
use gatehouse_core::domain::request::{ContainerActionKind, ContainerFilter, OptionMap, OptionValue};
use gatehouse_core::domain::result::OperationResult;

use super::{interrupt_token, CommandContext};
use crate::options::CreateFlags;
use crate::output;

#[derive(Subcommand)]
pub enum ContainerCommand {
    /// List containers
    #[command(alias = "ls")]
    List {
        /// Include stopped containers
        #[arg(short, long)]
        all: bool,

        /// Only containers in this state (running, exited, ...)
        #[arg(long)]
        status: Option<String>,

        /// Only containers carrying this label (`key` or `key=value`)
        #[arg(long)]
        label: Option<String>,

        /// Only containers whose name contains this
        #[arg(long)]
        name: Option<String>,
    },

    /// Show container details
    Inspect {
        #[arg(value_name = "CONTAINER")]
        id: String,
    },

    /// Start a stopped container
    Start {
        #[arg(value_name = "CONTAINER")]
        id: String,
    },

    /// Stop a running container
    Stop {
        #[arg(value_name = "CONTAINER")]
        id: String,

        /// Seconds to wait before killing
        #[arg(short, long)]
        timeout: Option<u32>,
    },

    /// Restart a container
    Restart {
        #[arg(value_name = "CONTAINER")]
        id: String,

        /// Seconds to wait before killing
        #[arg(short, long)]
        timeout: Option<u32>,
    },

    /// Remove a container
    #[command(name = "rm")]
    Remove {
        #[arg(value_name = "CONTAINER")]
        id: String,

        /// Remove even if running
        #[arg(short, long)]
        force: bool,

        /// Remove anonymous volumes as well
        #[arg(short, long)]
        volumes: bool,
    },

    /// Print container logs
    Logs {
        #[arg(value_name = "CONTAINER")]
        id: String,

        /// Number of lines from the end
        #[arg(short = 'n', long)]
        tail: Option<u32>,

        /// Follow log output until the container stops
        #[arg(short, long)]
        follow: bool,

        /// Prefix lines with timestamps
        #[arg(short = 't', long)]
        timestamps: bool,

        /// Only lines since this unix timestamp
        #[arg(long)]
        since: Option<i64>,
    },

    /// Show resource usage
    Stats {
        #[arg(value_name = "CONTAINER")]
        id: String,
    },

    /// Create a container without starting it
    Create(CreateArgs),

    /// Create and start a container
    Run(CreateArgs),
}

#[derive(Args, Clone)]
pub struct CreateArgs {
    /// Image reference
    #[arg(value_name = "IMAGE")]
    pub image: String,

    /// Container name
    #[arg(long)]
    pub name: Option<String>,

    /// Command to run instead of the image default
    #[arg(long)]
    pub command: Option<String>,

    /// Environment variable (KEY=VALUE)
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Port binding (HOST:CONTAINER)
    #[arg(short, long = "publish", value_name = "HOST:CONTAINER")]
    pub publish: Vec<String>,

    /// Bind mount (SOURCE:TARGET[:ro])
    #[arg(short, long = "volume", value_name = "SOURCE:TARGET")]
    pub volume: Vec<String>,

    /// Label (KEY=VALUE)
    #[arg(short, long = "label", value_name = "KEY=VALUE")]
    pub label: Vec<String>,

    /// CPU limit in cores
    #[arg(long)]
    pub cpus: Option<f64>,

    /// Memory limit (512m, 1g)
    #[arg(short, long)]
    pub memory: Option<String>,

    /// Any other creation option (key=value)
    #[arg(short, long = "opt", value_name = "KEY=VALUE")]
    pub opt: Vec<String>,
}

impl CreateArgs {
    fn into_parts(self) -> Result<(String, OptionMap)> {
        let flags = CreateFlags {
            name: self.name,
            command: self.command,
            env: self.env,
            ports: self.publish,
            mounts: self.volume,
            labels: self.label,
            cpus: self.cpus,
            memory: self.memory,
            extra: self.opt,
        };
        Ok((self.image, flags.into_options()?))
    }
}

pub async fn handle_command(command: ContainerCommand, ctx: &CommandContext) -> Result<()> {
    let gateway = ctx.gateway()?;
    let core = &gateway.core;

    match command {
        ContainerCommand::List {
            all,
            status,
            label,
            name,
        } => {
            let filter = ContainerFilter {
                all,
                status,
                label,
                name,
            };
            let containers = core
                .list_containers(&filter)
                .await
                .context("Failed to list containers")?;
            if ctx.json {
                output::json(&containers)
            } else {
                output::container_table(&containers);
                Ok(())
            }
        }
        ContainerCommand::Inspect { id } => {
            let details = core
                .inspect_container(&id)
                .await
                .with_context(|| format!("Failed to inspect container {}", id))?;
            output::json(&details)
        }
        ContainerCommand::Start { id } => {
            action(ctx, core, &id, ContainerActionKind::Start, OptionMap::new()).await
        }
        ContainerCommand::Stop { id, timeout } => {
            action(ctx, core, &id, ContainerActionKind::Stop, timeout_option(timeout)).await
        }
        ContainerCommand::Restart { id, timeout } => {
            action(ctx, core, &id, ContainerActionKind::Restart, timeout_option(timeout)).await
        }
        ContainerCommand::Remove { id, force, volumes } => {
            let mut options = OptionMap::new();
            options.insert("force".to_string(), OptionValue::Bool(force));
            options.insert("volumes".to_string(), OptionValue::Bool(volumes));
            action(ctx, core, &id, ContainerActionKind::Remove, options).await
        }
        ContainerCommand::Logs {
            id,
            tail,
            follow,
            timestamps,
            since,
        } => {
            let mut options = OptionMap::new();
            if let Some(tail) = tail {
                options.insert("tail".to_string(), OptionValue::from(tail));
            }
            options.insert("follow".to_string(), OptionValue::Bool(follow));
            options.insert("timestamps".to_string(), OptionValue::Bool(timestamps));
            if let Some(since) = since {
                options.insert("since".to_string(), OptionValue::Int(since));
            }
            logs(ctx, core, &id, options).await
        }
        ContainerCommand::Stats { id } => {
            let stats = core
                .container_stats(&id)
                .await
                .with_context(|| format!("Failed to read stats of container {}", id))?;
            if ctx.json {
                output::json(&stats)
            } else {
                output::stats_table(&stats);
                Ok(())
            }
        }
        ContainerCommand::Create(args) => {
            let (image, options) = args.into_parts()?;
            let result = core
                .create_container(&image, options)
                .await
                .with_context(|| format!("Failed to create container from {}", image))?;
            report(ctx, &result)
        }
        ContainerCommand::Run(args) => {
            let (image, options) = args.into_parts()?;
            let result = core
                .run_container(&image, options)
                .await
                .with_context(|| format!("Failed to run container from {}", image))?;
            report(ctx, &result)
        }
    }
}

fn timeout_option(timeout: Option<u32>) -> OptionMap {
    let mut options = OptionMap::new();
    if let Some(timeout) = timeout {
        options.insert("timeout".to_string(), OptionValue::from(timeout));
    }
    options
}

async fn action(
    ctx: &CommandContext,
    core: &OperationCore,
    id: &str,
    kind: ContainerActionKind,
    options: OptionMap,
) -> Result<()> {
    let result = core
        .container_action(id, kind, options)
        .await
        .with_context(|| format!("Failed to {} container {}", kind, id))?;
    report(ctx, &result)
}

fn report(ctx: &CommandContext, result: &OperationResult) -> Result<()> {
    if ctx.json {
        output::json(result)
    } else {
        output::operation_result(result);
        Ok(())
    }
}

async fn logs(
    ctx: &CommandContext,
    core: &OperationCore,
    id: &str,
    options: OptionMap,
) -> Result<()> {
    let cancel = interrupt_token();
    let mut stream = core
        .container_logs_with(id, options, cancel.clone())
        .await
        .with_context(|| format!("Failed to read logs of container {}", id))?;

    while let Some(item) = stream.next().await {
        match item {
            Ok(line) if ctx.json => output::json_line(&line)?,
            Ok(line) => output::log_line(&line),
            Err(fault) => {
                eprintln!("{}", output::describe_fault(&fault).red());
                return Err(fault).context("Log stream ended with a fault");
            }
        }
    }

    if cancel.is_cancelled() {
        debug!(container = %id, "Log stream detached by interrupt");
    }
    Ok(())
}
