// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Compose projects
//!
//! Commands: up, down, ps, logs

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use gatehouse_core::domain::compose::ComposeFile;

use super::CommandContext;
use crate::output;

#[derive(Subcommand)]
pub enum ComposeCommand {
    /// Create networks and (re)create service containers
    Up {
        /// Compose file
        #[arg(short, long, value_name = "FILE", default_value = "docker-compose.yml")]
        file: PathBuf,

        /// Project name, used as container and network prefix
        #[arg(short, long)]
        project: String,

        /// Services to deploy (default: all). Dependencies come along.
        #[arg(value_name = "SERVICE")]
        services: Vec<String>,
    },

    /// Stop and remove the project's containers and networks
    Down {
        #[arg(short, long)]
        project: String,

        /// Remove anonymous volumes too
        #[arg(short, long)]
        volumes: bool,
    },

    /// List the project's containers
    Ps {
        #[arg(short, long)]
        project: String,
    },

    /// Recent logs per service
    Logs {
        #[arg(short, long)]
        project: String,

        /// Lines per service
        #[arg(short = 'n', long)]
        tail: Option<u32>,

        #[arg(value_name = "SERVICE")]
        services: Vec<String>,
    },
}

pub async fn handle_command(command: ComposeCommand, ctx: &CommandContext) -> Result<()> {
    let gateway = ctx.gateway()?;
    let compose = &gateway.compose;

    match command {
        ComposeCommand::Up {
            file,
            project,
            services,
        } => {
            let definition = ComposeFile::from_yaml_file(&file)
                .with_context(|| format!("Failed to read compose file {}", file.display()))?;
            let report = compose
                .up(&project, &definition, &services)
                .await
                .with_context(|| format!("Failed to bring up {}", project))?;

            if ctx.json {
                output::json(&report)?;
            } else {
                for network in &report.networks {
                    println!("{} network {}", "✓".green(), network);
                }
                for service in &report.deployed {
                    println!(
                        "{} {:<16} {} → {}",
                        "✓".green(),
                        service.service.bold(),
                        service.container_name,
                        output::paint_status(&service.status)
                    );
                }
                for error in &report.errors {
                    eprintln!("{} {}", "✗".red(), error);
                }
            }
            if !report.success() {
                bail!("{} service(s) of {} failed", report.errors.len(), project);
            }
            Ok(())
        }
        ComposeCommand::Down { project, volumes } => {
            let report = compose
                .down(&project, volumes)
                .await
                .with_context(|| format!("Failed to bring down {}", project))?;

            if ctx.json {
                output::json(&report)?;
            } else {
                if report.removed_containers.is_empty() && report.removed_networks.is_empty() {
                    println!("{}", format!("Nothing to remove for {}", project).yellow());
                }
                for container in &report.removed_containers {
                    println!("{} removed {}", "✓".green(), container);
                }
                for network in &report.removed_networks {
                    println!("{} removed network {}", "✓".green(), network);
                }
                for error in &report.errors {
                    eprintln!("{} {}", "✗".red(), error);
                }
            }
            if !report.success() {
                bail!("{} removal(s) in {} failed", report.errors.len(), project);
            }
            Ok(())
        }
        ComposeCommand::Ps { project } => {
            let containers = compose
                .ps(&project)
                .await
                .with_context(|| format!("Failed to list {}", project))?;
            if ctx.json {
                return output::json(&containers);
            }
            if containers.is_empty() {
                println!("{}", "No containers found".yellow());
                return Ok(());
            }
            println!(
                "{:<16} {:<24} {:<32} {:<10} {}",
                "SERVICE", "NAME", "IMAGE", "STATE", "STATUS"
            );
            for container in &containers {
                println!(
                    "{:<16} {:<24} {:<32} {:<10} {}",
                    container.service,
                    container.name,
                    container.image,
                    output::paint_status(container.state.as_str()),
                    container.status.dimmed()
                );
            }
            Ok(())
        }
        ComposeCommand::Logs {
            project,
            tail,
            services,
        } => {
            let logs = compose
                .logs(&project, &services, tail)
                .await
                .with_context(|| format!("Failed to read logs of {}", project))?;
            if ctx.json {
                return output::json(&logs);
            }
            for entry in &logs {
                println!("{}", format!("==> {} ({})", entry.service, entry.container).bold());
                if let Some(error) = &entry.error {
                    eprintln!("  {}", error.red());
                }
                for line in &entry.lines {
                    output::log_line(line);
                }
            }
            Ok(())
        }
    }
}
