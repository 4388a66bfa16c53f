// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Image operations
//!
//! Commands: list, pull, rm

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use futures::StreamExt;

use gatehouse_core::application::operations::PullEvent;
use gatehouse_core::domain::request::{ImageActionKind, OptionMap, OptionValue};

use super::{interrupt_token, CommandContext};
use crate::output;

#[derive(Subcommand)]
pub enum ImageCommand {
    /// List local images
    #[command(alias = "ls")]
    List,

    /// Pull an image, showing progress
    Pull {
        /// Image reference (`name`, `name:tag`)
        #[arg(value_name = "IMAGE")]
        image: String,

        /// Tag to pull when the reference has none
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Remove an image
    #[command(name = "rm")]
    Remove {
        #[arg(value_name = "IMAGE")]
        image: String,

        /// Remove even if containers use it
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn handle_command(command: ImageCommand, ctx: &CommandContext) -> Result<()> {
    let gateway = ctx.gateway()?;
    let core = &gateway.core;

    match command {
        ImageCommand::List => {
            let images = core.list_images().await.context("Failed to list images")?;
            if ctx.json {
                output::json(&images)
            } else {
                output::image_table(&images);
                Ok(())
            }
        }
        ImageCommand::Pull { image, tag } => {
            let mut options = OptionMap::new();
            if let Some(tag) = tag {
                options.insert("tag".to_string(), OptionValue::Text(tag));
            }

            let cancel = interrupt_token();
            let mut events = core
                .pull_image(&image, options, cancel)
                .await
                .with_context(|| format!("Failed to pull {}", image))?;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(fault) => {
                        eprintln!("{}", output::describe_fault(&fault).red());
                        return Err(fault).with_context(|| format!("Pull of {} failed", image));
                    }
                };
                if ctx.json {
                    output::json_line(&event)?;
                    continue;
                }
                match event {
                    PullEvent::Progress(progress) => {
                        if let Some(line) = progress.line() {
                            println!("{}", line.dimmed());
                        }
                    }
                    PullEvent::Done(result) => output::operation_result(&result),
                }
            }
            Ok(())
        }
        ImageCommand::Remove { image, force } => {
            let mut options = OptionMap::new();
            options.insert("force".to_string(), OptionValue::Bool(force));
            let result = core
                .image_action(&image, ImageActionKind::Remove, options)
                .await
                .with_context(|| format!("Failed to remove image {}", image))?;
            if ctx.json {
                output::json(&result)
            } else {
                output::operation_result(&result);
                Ok(())
            }
        }
    }
}
