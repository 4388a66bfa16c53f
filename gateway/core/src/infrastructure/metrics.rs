// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Gateway metrics.
//!
//! Names follow Prometheus conventions (`_total` counters, `_seconds`
//! histograms). Recording is a no-op until the host process installs a
//! recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub fn register_gateway_metrics() {
    describe_counter!(
        "gatehouse_daemon_calls_total",
        "Daemon calls issued (by call, outcome)"
    );
    describe_counter!(
        "gatehouse_daemon_retries_total",
        "Retries after transient daemon transport faults (by call)"
    );
    describe_counter!(
        "gatehouse_daemon_faults_total",
        "Classified daemon faults (by call, fault)"
    );
    describe_histogram!(
        "gatehouse_daemon_call_duration_seconds",
        "Daemon call duration including retries (by call)"
    );
    describe_counter!(
        "gatehouse_policy_rejections_total",
        "Requests refused by the validation policy (by reason)"
    );
    describe_histogram!(
        "gatehouse_build_duration_seconds",
        "Build run duration (by project, outcome)"
    );
}

pub fn record_call(call: &'static str, outcome: &'static str, duration_secs: f64) {
    counter!("gatehouse_daemon_calls_total", "call" => call, "outcome" => outcome).increment(1);
    histogram!("gatehouse_daemon_call_duration_seconds", "call" => call).record(duration_secs);
}

pub fn record_retry(call: &'static str) {
    counter!("gatehouse_daemon_retries_total", "call" => call).increment(1);
}

pub fn record_fault(call: &'static str, fault: &'static str) {
    counter!("gatehouse_daemon_faults_total", "call" => call, "fault" => fault).increment(1);
}

pub fn record_rejection(reason: &'static str) {
    counter!("gatehouse_policy_rejections_total", "reason" => reason).increment(1);
}

pub fn record_build(project: &str, outcome: &'static str, duration_secs: f64) {
    histogram!(
        "gatehouse_build_duration_seconds",
        "project" => project.to_string(),
        "outcome" => outcome
    )
    .record(duration_secs);
}
