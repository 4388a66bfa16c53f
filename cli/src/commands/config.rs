// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use gatehouse_core::domain::config::GatewayConfigManifest;
use gatehouse_core::domain::project::ProjectDescriptor;

use super::CommandContext;
use crate::output;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./gatehouse-config.yaml")]
        output: PathBuf,

        /// Include a sample project and mount root
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, ctx: &CommandContext) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(ctx, paths),
        ConfigCommand::Validate { file } => validate(file.or_else(|| ctx.config_path.clone())),
        ConfigCommand::Generate { output, examples } => generate(output, examples),
    }
}

fn show(ctx: &CommandContext, show_paths: bool) -> Result<()> {
    let config = GatewayConfigManifest::load_or_default(ctx.config_path.clone())
        .context("Failed to load configuration")?;

    if ctx.json {
        return output::json(&config);
    }

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &ctx.config_path {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. GATEHOUSE_CONFIG_PATH: {}",
            std::env::var("GATEHOUSE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./gatehouse-config.yaml");
        println!("  4. ~/.gatehouse/config.yaml");
        println!("  5. /etc/gatehouse/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Gateway:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let daemon = &config.spec.daemon;
    println!("{}", "Daemon:".bold());
    println!("  Endpoint: {}", daemon.endpoint);
    println!("  Call timeout: {}s", daemon.timeout_secs);
    println!(
        "  Retries: {} (backoff {}ms)",
        daemon.max_retries, daemon.retry_backoff_ms
    );
    println!("  Stream idle timeout: {}s", daemon.stream_idle_timeout_secs);
    println!();

    let policy = &config.spec.policy;
    println!("{}", "Policy:".bold());
    if policy.allowed_mount_roots.is_empty() {
        println!("  Mount roots: {}", "(none, host mounts are refused)".dimmed());
    } else {
        println!("  Mount roots:");
        for root in &policy.allowed_mount_roots {
            println!("    - {}", root.display());
        }
    }
    if !policy.allowed_capabilities.is_empty() {
        println!("  Capabilities: {}", policy.allowed_capabilities.join(", "));
    }
    if !policy.allowed_images.is_empty() {
        println!("  Allowed images: {}", policy.allowed_images.join(", "));
    }
    if !policy.blocked_images.is_empty() {
        println!("  Blocked images: {}", policy.blocked_images.join(", "));
    }
    println!(
        "  Limits: {} cpus, {}, log tail {}",
        policy.max_cpus,
        output::human_bytes(policy.max_memory_bytes),
        policy.max_log_tail
    );
    println!();

    println!("{}", "Projects:".bold());
    if config.spec.projects.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for project in &config.spec.projects {
        println!("  {} → {}", project.name.bold(), project.context.display());
    }

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = GatewayConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = sample_manifest(with_examples).to_yaml_string()?;

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

pub fn sample_manifest(with_examples: bool) -> GatewayConfigManifest {
    let mut config = GatewayConfigManifest::default();
    if with_examples {
        config.spec.policy.allowed_mount_roots = vec![PathBuf::from("/srv/gatehouse/data")];
        config.spec.policy.blocked_images = vec!["xmrig".to_string()];

        let mut project = ProjectDescriptor::new("web", "/srv/gatehouse/projects/web");
        project.deploy.container_name = Some("web".to_string());
        project.deploy.ports.insert(80, 8080);
        project.deploy.restart_policy = Some("unless-stopped".to_string());
        config.spec.projects.push(project);
    }
    config
}
