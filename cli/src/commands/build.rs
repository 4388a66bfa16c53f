// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! `gatehouse build <project>`: build, tag, push and deploy a registered
//! project, streaming progress.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use futures::StreamExt;
use tracing::info;

use gatehouse_core::domain::build::BuildEvent;
use gatehouse_core::domain::request::{OptionMap, OptionValue};

use super::{interrupt_token, CommandContext};
use crate::output;

#[derive(Args, Clone, Debug, Default)]
pub struct BuildArgs {
    /// Registered project name
    #[arg(value_name = "PROJECT")]
    pub project: String,

    /// Primary tag (defaults to the project's tag)
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Additional tags
    #[arg(long = "also-tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Push every tag after building
    #[arg(long)]
    pub push: bool,

    /// Replace the project's container with the new image
    #[arg(long)]
    pub deploy: bool,

    /// Build without the layer cache
    #[arg(long)]
    pub no_cache: bool,
}

impl BuildArgs {
    pub fn options(&self) -> OptionMap {
        let mut options = OptionMap::new();
        if let Some(tag) = &self.tag {
            options.insert("tag".to_string(), OptionValue::Text(tag.clone()));
        }
        if !self.tags.is_empty() {
            options.insert("tags".to_string(), OptionValue::Text(self.tags.join(",")));
        }
        options.insert("push".to_string(), OptionValue::Bool(self.push));
        options.insert("deploy".to_string(), OptionValue::Bool(self.deploy));
        options.insert("no_cache".to_string(), OptionValue::Bool(self.no_cache));
        options
    }
}

pub async fn handle_command(args: BuildArgs, ctx: &CommandContext) -> Result<()> {
    let gateway = ctx.gateway()?;

    let cancel = interrupt_token();
    let handle = gateway
        .builds
        .start_build(&args.project, args.options(), cancel)
        .with_context(|| format!("Failed to start build of {}", args.project))?;
    let (build_id, mut events, join) = handle.into_parts();
    info!(build_id = %build_id, project = %args.project, "Build started");

    while let Some(event) = events.next().await {
        if ctx.json {
            output::json_line(&event)?;
            continue;
        }
        match event {
            BuildEvent::StepStarted { step, .. } => {
                println!("{}", format!("==> {}", step).bold());
            }
            BuildEvent::Output { line, .. } => println!("{}", line.dimmed()),
            BuildEvent::StepCompleted { step, .. } => {
                println!("{}", format!("✓ {}", step).green());
            }
            BuildEvent::Finished { .. } => {}
        }
    }

    let run = join.await.context("Build task did not finish")?;
    if !ctx.json {
        println!();
        output::build_run(&run);
    }

    if let Some(fault) = run.fault() {
        bail!("Build {} {}: {}", run.id, run.state.label(), output::describe_fault(fault));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_options() {
        let args = BuildArgs {
            project: "ocr".to_string(),
            tags: vec!["ocr:1.4".to_string(), "registry.local/ocr:1.4".to_string()],
            deploy: true,
            ..Default::default()
        };

        let options = args.options();

        assert!(!options.contains_key("tag"));
        assert_eq!(
            options["tags"],
            OptionValue::Text("ocr:1.4,registry.local/ocr:1.4".to_string())
        );
        assert_eq!(options["deploy"], OptionValue::Bool(true));
        assert_eq!(options["push"], OptionValue::Bool(false));
    }
}
