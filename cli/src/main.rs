// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Gatehouse CLI
//!
//! The `gatehouse` binary drives a single container daemon through the
//! gateway's validation policy.
//!
//! ## Commands
//!
//! - `gatehouse containers list|inspect|start|stop|restart|rm|logs|stats|create|run`
//! - `gatehouse images list|pull|rm`
//! - `gatehouse build <project> [--tag T] [--push] [--deploy]`
//! - `gatehouse projects list`
//! - `gatehouse compose up|down|ps|logs -p <project>`
//! - `gatehouse config show|validate|generate` - Configuration management
//! - `gatehouse ping`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use gatehouse_cli::commands::{
    self, BuildArgs, CommandContext, ComposeCommand, ConfigCommand, ContainerCommand,
    ImageCommand, ProjectCommand,
};
use gatehouse_core::domain::config::GatewayConfigManifest;

/// Gatehouse - policy-checked access to a container daemon
#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "GATEHOUSE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GATEHOUSE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Container lifecycle, logs and stats
    #[command(name = "containers", alias = "container")]
    Containers {
        #[command(subcommand)]
        command: ContainerCommand,
    },

    /// Image listing, pulls and removal
    #[command(name = "images", alias = "image")]
    Images {
        #[command(subcommand)]
        command: ImageCommand,
    },

    /// Build a registered project
    #[command(name = "build")]
    Build(BuildArgs),

    /// Registered build projects
    #[command(name = "projects")]
    Projects {
        #[command(subcommand)]
        command: ProjectCommand,
    },

    /// Compose projects on the daemon
    #[command(name = "compose")]
    Compose {
        #[command(subcommand)]
        command: ComposeCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Check that the daemon answers
    #[command(name = "ping")]
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Logging settings come from the configuration when it loads; a broken
    // file is reported by the command itself.
    let logging = GatewayConfigManifest::load_or_default(cli.config.clone())
        .map(|config| config.spec.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(logging.level);
    init_logging(&level, &logging.format)?;

    let ctx = CommandContext {
        config_path: cli.config,
        json: cli.json,
    };

    match cli.command {
        Some(Commands::Containers { command }) => {
            commands::containers::handle_command(command, &ctx).await
        }
        Some(Commands::Images { command }) => commands::images::handle_command(command, &ctx).await,
        Some(Commands::Build(args)) => commands::build::handle_command(args, &ctx).await,
        Some(Commands::Projects { command }) => {
            commands::projects::handle_command(command, &ctx).await
        }
        Some(Commands::Compose { command }) => {
            commands::compose::handle_command(command, &ctx).await
        }
        Some(Commands::Config { command }) => commands::config::handle_command(command, &ctx).await,
        Some(Commands::Ping) => commands::ping::handle_command(&ctx).await,
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
