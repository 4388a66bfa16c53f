// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Daemon Executor
//!
//! Every daemon interaction goes through [`DaemonExecutor`]: it bounds each
//! attempt with the configured budget, retries transient transport faults
//! with exponential backoff and classifies client errors into
//! [`DaemonFault`]. The executor does not validate; callers only hand it
//! operations the validation engine admitted.

use crate::domain::config::DaemonSettings;
use crate::domain::daemon::{
    DaemonCall, DaemonClient, DaemonClientError, DaemonStream, RawDaemonResponse, StreamCall,
    StreamItem,
};
use crate::domain::fault::DaemonFault;
use crate::infrastructure::metrics;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Stream of daemon items with faults already classified.
pub type ExecutorStream = BoxStream<'static, Result<StreamItem, DaemonFault>>;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Budget for one attempt; stop and restart also get their grace period
    pub call_timeout: Duration,
    pub max_retries: u32,
    /// First backoff; doubled on each further retry
    pub retry_backoff: Duration,
    pub stream_idle_timeout: Duration,
    pub stream_buffer: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        (&DaemonSettings::default()).into()
    }
}

impl From<&DaemonSettings> for ExecutorSettings {
    fn from(settings: &DaemonSettings) -> Self {
        Self {
            call_timeout: settings.timeout(),
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff(),
            stream_idle_timeout: settings.stream_idle_timeout(),
            stream_buffer: settings.stream_buffer.max(1),
        }
    }
}

/// What one executed call cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReport {
    pub operation: &'static str,
    pub attempts: u32,
    pub retries: u32,
    pub elapsed: Duration,
}

/// Owns the daemon client. Shared as `Arc<DaemonExecutor>`.
pub struct DaemonExecutor {
    client: Arc<dyn DaemonClient>,
    settings: ExecutorSettings,
    retries_total: AtomicU64,
    last_report: Mutex<Option<CallReport>>,
}

impl DaemonExecutor {
    pub fn new(client: Arc<dyn DaemonClient>, settings: ExecutorSettings) -> Self {
        Self {
            client,
            settings,
            retries_total: AtomicU64::new(0),
            last_report: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Retries issued since the executor was created.
    pub fn retry_count(&self) -> u64 {
        self.retries_total.load(Ordering::Relaxed)
    }

    /// Report of the most recently finished call or stream open.
    pub fn last_report(&self) -> Option<CallReport> {
        self.last_report.lock().clone()
    }

    pub async fn execute(&self, call: DaemonCall) -> Result<RawDaemonResponse, DaemonFault> {
        self.execute_with_report(call).await.0
    }

    /// Execute `call` and also return what it cost, whatever the outcome.
    pub async fn execute_with_report(
        &self,
        call: DaemonCall,
    ) -> (Result<RawDaemonResponse, DaemonFault>, CallReport) {
        let operation = call.name();
        let target = call.target().map(str::to_string);
        let budget = self.settings.call_timeout + call.grace();
        let started = Instant::now();
        let mut attempts = 0u32;

        let result = loop {
            attempts += 1;
            debug!(operation, attempt = attempts, "Issuing daemon call");

            match tokio::time::timeout(budget, self.client.call(call.clone()))
                .await
            {
                Ok(Ok(response)) => break Ok(response),
                Ok(Err(err)) if err.is_transient() && attempts <= self.settings.max_retries => {
                    self.backoff(operation, attempts, &err).await;
                }
                Ok(Err(err)) => {
                    break Err(classify(err, operation, target.as_deref(), budget))
                }
                Err(_) => {
                    warn!(
                        operation,
                        budget_ms = budget.as_millis() as u64,
                        "Daemon call timed out"
                    );
                    break Err(DaemonFault::timeout(operation, budget));
                }
            }
        };

        let report = self.finish(operation, attempts, started, &result);
        (result, report)
    }

    /// Open a streaming operation.
    ///
    /// Opening, and waiting for the first item, are retried like a bounded
    /// call; a transport fault after the first item ends the stream. If no
    /// item arrives within the call budget the stream is handed over as is.
    pub async fn open_stream(&self, call: StreamCall) -> Result<ExecutorStream, DaemonFault> {
        let operation = call.name();
        let target = call.target().to_string();
        let started = Instant::now();
        let budget = self.settings.call_timeout;
        let mut attempts = 0u32;

        let result: Result<(Option<Result<StreamItem, DaemonClientError>>, DaemonStream), DaemonFault> = loop {
            attempts += 1;
            debug!(operation, attempt = attempts, "Opening daemon stream");

            let mut opened = match tokio::time::timeout(budget, self.client.open_stream(call.clone())).await {
                Ok(Ok(opened)) => opened,
                Ok(Err(err)) if err.is_transient() && attempts <= self.settings.max_retries => {
                    self.backoff(operation, attempts, &err).await;
                    continue;
                }
                Ok(Err(err)) => break Err(classify(err, operation, Some(&target), budget)),
                Err(_) => break Err(DaemonFault::timeout(operation, budget)),
            };

            match tokio::time::timeout(budget, opened.next()).await {
                Ok(Some(Err(err))) if err.is_transient() && attempts <= self.settings.max_retries => {
                    self.backoff(operation, attempts, &err).await;
                }
                Ok(Some(Err(err))) => break Err(classify(err, operation, Some(&target), budget)),
                Ok(Some(Ok(item))) => break Ok((Some(Ok(item)), opened)),
                Ok(None) => break Ok((None, stream::empty().boxed())),
                // Quiet stream (e.g. following an idle container); hand it over.
                Err(_) => break Ok((None, opened)),
            }
        };

        let outcome = result.as_ref().map(|_| ()).map_err(|fault| fault.clone());
        self.finish(operation, attempts, started, &outcome);

        let (first, rest) = result?;
        let stream = stream::iter(first).chain(rest).map(move |item| {
            item.map_err(|err| {
                let fault = classify(err, operation, Some(&target), budget);
                metrics::record_fault(operation, fault.code());
                fault
            })
        });
        Ok(stream.boxed())
    }

    /// Daemon liveness check.
    pub async fn ping(&self) -> Result<(), DaemonFault> {
        self.execute(DaemonCall::Ping).await.map(|_| ())
    }

    async fn backoff(&self, operation: &'static str, attempt: u32, err: &DaemonClientError) {
        let delay = self
            .settings
            .retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        warn!(
            operation,
            attempt,
            max_retries = self.settings.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient daemon fault, retrying"
        );
        self.retries_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_retry(operation);
        tokio::time::sleep(delay).await;
    }

    fn finish<T>(
        &self,
        operation: &'static str,
        attempts: u32,
        started: Instant,
        result: &Result<T, DaemonFault>,
    ) -> CallReport {
        let report = CallReport {
            operation,
            attempts,
            retries: attempts.saturating_sub(1),
            elapsed: started.elapsed(),
        };
        let secs = report.elapsed.as_secs_f64();
        match result {
            Ok(_) => metrics::record_call(operation, "ok", secs),
            Err(fault) => {
                metrics::record_call(operation, "fault", secs);
                metrics::record_fault(operation, fault.code());
                if let DaemonFault::Unreachable { detail } = fault {
                    error!(operation, attempts, detail = %detail, "Daemon unreachable");
                }
            }
        }
        *self.last_report.lock() = Some(report.clone());
        report
    }
}

/// Translate a client error into the closed fault taxonomy.
pub fn classify(
    error: DaemonClientError,
    operation: &str,
    target: Option<&str>,
    budget: Duration,
) -> DaemonFault {
    match error {
        DaemonClientError::Transport(detail) => DaemonFault::Unreachable { detail },
        DaemonClientError::TimedOut => DaemonFault::timeout(operation, budget),
        DaemonClientError::Api { status: 404, message } => DaemonFault::NotFound {
            target: target.map(str::to_string).unwrap_or(message),
        },
        DaemonClientError::Api { status: 304, message } => DaemonFault::Conflict {
            detail: if message.trim().is_empty() {
                format!("{} not modified", target.unwrap_or(operation))
            } else {
                message
            },
        },
        DaemonClientError::Api { status: 409, message } => DaemonFault::Conflict { detail: message },
        DaemonClientError::Api { status, message } => DaemonFault::UpstreamFault {
            detail: format!("daemon returned {}: {}", status, message),
        },
        DaemonClientError::Other(detail) => DaemonFault::UpstreamFault { detail },
    }
}
