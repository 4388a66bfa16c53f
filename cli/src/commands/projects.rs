// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::CommandContext;
use crate::output;

#[derive(Subcommand)]
pub enum ProjectCommand {
    /// List projects registered for builds
    #[command(alias = "ls")]
    List,
}

pub async fn handle_command(command: ProjectCommand, ctx: &CommandContext) -> Result<()> {
    match command {
        ProjectCommand::List => list(ctx),
    }
}

fn list(ctx: &CommandContext) -> Result<()> {
    let config = ctx.load_config()?;
    let mut projects = config.spec.projects.clone();
    projects.sort_by(|a, b| a.name.cmp(&b.name));

    if ctx.json {
        return output::json(&projects);
    }

    if projects.is_empty() {
        println!("{}", "No projects registered".yellow());
        return Ok(());
    }

    println!("{:<20} {:<28} {:<24} {}", "NAME", "TAG", "CONTAINER", "CONTEXT");
    for project in &projects {
        println!(
            "{:<20} {:<28} {:<24} {}",
            project.name.bold(),
            project.tag(),
            project.container_name(),
            project.context.display()
        );
    }
    Ok(())
}
