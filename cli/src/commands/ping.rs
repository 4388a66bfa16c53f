// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use std::time::Instant;

use super::CommandContext;
use crate::gateway::Gateway;
use crate::output;

/// Check that the configured daemon answers.
pub async fn handle_command(ctx: &CommandContext) -> Result<()> {
    let config = ctx.load_config()?;
    let endpoint = config.spec.daemon.endpoint.clone();
    let gateway = Gateway::connect(&config)?;

    let started = Instant::now();
    gateway
        .core
        .ping()
        .await
        .with_context(|| format!("Daemon at {} did not answer", endpoint))?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if ctx.json {
        return output::json(&json!({
            "endpoint": endpoint,
            "reachable": true,
            "elapsed_ms": elapsed_ms,
        }));
    }

    println!(
        "{}",
        format!("✓ Daemon reachable at {} ({} ms)", endpoint, elapsed_ms).green()
    );
    Ok(())
}
