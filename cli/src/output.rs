// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Human and JSON rendering of core results.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use gatehouse_core::domain::build::{BuildRun, BuildState, StepStatus};
use gatehouse_core::domain::fault::OperationFault;
use gatehouse_core::domain::result::{
    ContainerStatus, ContainerSummary, ImageSummary, LogLine, LogStream, OperationResult,
    ResultDetails, StatsSnapshot,
};

/// Print a value as pretty JSON.
pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One JSON document per line, for streamed items.
pub fn json_line<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub fn paint_status(status: &str) -> String {
    match ContainerStatus::parse(status) {
        ContainerStatus::Running => status.green().to_string(),
        ContainerStatus::Stopped | ContainerStatus::Dead => status.red().to_string(),
        ContainerStatus::Removed => status.dimmed().to_string(),
        _ => status.yellow().to_string(),
    }
}

/// Render a fault the way operators read it: kind first, then detail.
pub fn describe_fault(fault: &OperationFault) -> String {
    match fault {
        OperationFault::PolicyViolation { .. } => format!("rejected: {}", fault),
        _ => fault.to_string(),
    }
}

pub fn operation_result(result: &OperationResult) {
    println!(
        "{} {} {} → {}",
        "✓".green(),
        result.action.bold(),
        result.id,
        paint_status(&result.status)
    );
    match &result.details {
        ResultDetails::Created { warnings } => {
            for warning in warnings {
                println!("  {} {}", "warning:".yellow(), warning);
            }
        }
        ResultDetails::Image { removed, untagged } => {
            for tag in untagged {
                println!("  untagged: {}", tag);
            }
            for id in removed {
                println!("  deleted: {}", id);
            }
        }
        ResultDetails::Pull { reference, events } => {
            println!("  {} ({} progress events)", reference, events);
        }
        ResultDetails::Logs { lines } => {
            for line in lines {
                log_line(line);
            }
        }
        ResultDetails::Stats(stats) => stats_table(stats),
        ResultDetails::Container(_) | ResultDetails::None => {}
    }
}

pub fn container_table(containers: &[ContainerSummary]) {
    if containers.is_empty() {
        println!("{}", "No containers found".yellow());
        return;
    }

    println!(
        "{:<14} {:<24} {:<32} {:<10} {}",
        "ID", "NAME", "IMAGE", "STATE", "STATUS"
    );
    for container in containers {
        println!(
            "{:<14} {:<24} {:<32} {:<10} {}",
            container.short_id,
            container.name,
            container.image,
            paint_status(container.state.as_str()),
            container.status.dimmed()
        );
    }
}

pub fn image_table(images: &[ImageSummary]) {
    if images.is_empty() {
        println!("{}", "No images found".yellow());
        return;
    }

    println!("{:<14} {:<48} {:>10}", "ID", "TAGS", "SIZE");
    for image in images {
        let tags = if image.tags.is_empty() {
            "<none>".to_string()
        } else {
            image.tags.join(", ")
        };
        println!("{:<14} {:<48} {:>10}", image.short_id, tags, human_bytes(image.size));
    }
}

pub fn stats_table(stats: &StatsSnapshot) {
    println!("{}", format!("Container {}", stats.id).bold());
    println!("  CPU:     {:.2}% ({} cpus)", stats.cpu_percent, stats.online_cpus);
    println!(
        "  Memory:  {} / {} ({:.2}%)",
        human_bytes(stats.memory_usage),
        human_bytes(stats.memory_limit),
        stats.memory_percent
    );
    println!(
        "  Net I/O: {} / {}",
        human_bytes(stats.network_rx_bytes),
        human_bytes(stats.network_tx_bytes)
    );
    println!(
        "  Blk I/O: {} / {}",
        human_bytes(stats.block_read_bytes),
        human_bytes(stats.block_write_bytes)
    );
    if let Some(pids) = stats.pids {
        println!("  PIDs:    {}", pids);
    }
}

pub fn log_line(line: &LogLine) {
    match line.stream {
        LogStream::Stderr => eprintln!("{}", line.message),
        _ => println!("{}", line.message),
    }
}

pub fn build_run(run: &BuildRun) {
    let headline = match &run.state {
        BuildState::Succeeded => format!("✓ Build {} succeeded", run.id).green(),
        BuildState::Failed { .. } => format!("✗ Build {} {}", run.id, run.state.label()).red(),
        _ => format!("Build {} {}", run.id, run.state.label()).yellow(),
    };
    println!("{}", headline);

    for record in &run.steps {
        let marker = match record.status {
            StepStatus::Succeeded => "✓".green(),
            StepStatus::Failed => "✗".red(),
            _ => "…".yellow(),
        };
        match &record.detail {
            Some(detail) => println!("  {} {:<10} {}", marker, record.step.as_str(), detail.dimmed()),
            None => println!("  {} {}", marker, record.step.as_str()),
        }
    }

    if let Some(image) = &run.image_id {
        println!("  image:     {}", image);
    }
    if !run.tags.is_empty() {
        println!("  tags:      {}", run.tags.join(", "));
    }
    if let Some(container) = &run.container_id {
        println!("  container: {}", container);
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(1024 * 1024 * 1024), "1.0 GiB");
    }

    #[test]
    fn test_fault_descriptions() {
        let fault = OperationFault::Timeout {
            operation: "container.stop".to_string(),
            budget_ms: 30_000,
        };
        assert!(describe_fault(&fault).contains("re-query"));

        let missing = OperationFault::not_found("abc123");
        assert_eq!(describe_fault(&missing), "Not found: abc123");
    }
}
