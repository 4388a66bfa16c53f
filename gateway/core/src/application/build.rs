// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Build Orchestrator
//!
//! Drives `build → (tag) → (push) → (deploy)` for registered projects on top
//! of the operation core. Each project builds at most once at a time per
//! process; a failed step stops the run without undoing earlier steps.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Sequence multi-step image pipelines and track their state

use crate::application::operations::OperationCore;
use crate::application::streaming::Relay;
use crate::domain::build::{BuildEvent, BuildRun, BuildStep};
use crate::domain::daemon::{DaemonCall, StreamCall, StreamItem};
use crate::domain::fault::{DaemonFault, OperationFault};
use crate::domain::operation::{BuildPlan, ValidatedOperation};
use crate::domain::request::{ContainerActionKind, OperationRequest, OptionMap};
use crate::domain::result::{short_id, ProgressEvent};
use crate::infrastructure::metrics;
use futures::StreamExt;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A build running in the background.
pub struct BuildHandle {
    pub build_id: String,
    /// Step and output events, ending with [`BuildEvent::Finished`]. The run
    /// waits for a slow reader, so drop this if it is not being read.
    pub events: ReceiverStream<BuildEvent>,
    join: JoinHandle<BuildRun>,
}

impl BuildHandle {
    /// Wait for the final state, discarding unread events.
    pub async fn wait(self) -> Result<BuildRun, OperationFault> {
        let BuildHandle { events, join, .. } = self;
        drop(events);
        join.await
            .map_err(|e| OperationFault::upstream(format!("build task failed: {}", e)))
    }

    pub fn into_parts(self) -> (String, ReceiverStream<BuildEvent>, JoinHandle<BuildRun>) {
        (self.build_id, self.events, self.join)
    }
}

/// Releases the project's single-flight slot on drop.
struct FlightGuard {
    project: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl FlightGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<String>>>, project: &str) -> Option<Self> {
        in_flight.lock().insert(project.to_string()).then(|| Self {
            project: project.to_string(),
            in_flight: in_flight.clone(),
        })
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.project);
    }
}

enum Prepared {
    /// Refused before any daemon call; the run is already terminal.
    Rejected(BuildRun),
    Admitted {
        run: BuildRun,
        plan: BuildPlan,
        guard: FlightGuard,
    },
}

type Events<'a> = Option<&'a Relay<BuildEvent>>;

#[derive(Clone)]
pub struct BuildOrchestrator {
    core: Arc<OperationCore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    history: Arc<Mutex<LruCache<String, BuildRun>>>,
}

impl BuildOrchestrator {
    pub fn new(core: Arc<OperationCore>, history: usize) -> Self {
        let capacity = NonZeroUsize::new(history.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            core,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            history: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn core(&self) -> &Arc<OperationCore> {
        &self.core
    }

    /// Projects with a build currently in flight.
    pub fn in_flight(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.in_flight.lock().iter().cloned().collect();
        projects.sort();
        projects
    }

    /// Latest snapshot of a recent build.
    pub fn build_status(&self, build_id: &str) -> Result<BuildRun, OperationFault> {
        self.history
            .lock()
            .get(build_id)
            .cloned()
            .ok_or_else(|| OperationFault::not_found(build_id))
    }

    /// Run a build to completion.
    ///
    /// Policy rejections come back as a run failed at `Pending`; a build
    /// already in flight for the same project is a `Conflict`.
    pub async fn run_build(&self, project: &str, options: OptionMap) -> Result<BuildRun, OperationFault> {
        match self.prepare(project, options)? {
            Prepared::Rejected(run) => Ok(run),
            Prepared::Admitted { run, plan, guard } => Ok(self.drive(run, plan, guard, None).await),
        }
    }

    /// Start a build in the background. Cancelling `cancel` stops event
    /// delivery only; the build itself runs on.
    pub fn start_build(
        &self,
        project: &str,
        options: OptionMap,
        cancel: CancellationToken,
    ) -> Result<BuildHandle, OperationFault> {
        let buffer = self.core.executor().settings().stream_buffer;
        let (relay, events) = Relay::channel(buffer, cancel);

        let (build_id, join) = match self.prepare(project, options)? {
            Prepared::Rejected(run) => {
                let build_id = run.id.clone();
                let join = tokio::spawn(async move {
                    relay
                        .send(BuildEvent::Finished {
                            run: Box::new(run.clone()),
                        })
                        .await;
                    run
                });
                (build_id, join)
            }
            Prepared::Admitted { run, plan, guard } => {
                let build_id = run.id.clone();
                let this = self.clone();
                let join = tokio::spawn(async move { this.drive(run, plan, guard, Some(&relay)).await });
                (build_id, join)
            }
        };

        Ok(BuildHandle {
            build_id,
            events,
            join,
        })
    }

    fn prepare(&self, project: &str, options: OptionMap) -> Result<Prepared, OperationFault> {
        let request = OperationRequest::build(project).with_options(options);
        let plan = match self.core.admit(&request) {
            Ok(ValidatedOperation::Build(plan)) => plan,
            Ok(other) => {
                return Err(OperationFault::upstream(format!(
                    "unexpected validated operation: {:?}",
                    other
                )))
            }
            Err(fault) => {
                let mut run = BuildRun::new(project);
                run.fail(fault);
                metrics::record_build(project, "rejected", 0.0);
                self.remember(&run);
                return Ok(Prepared::Rejected(run));
            }
        };

        let guard = FlightGuard::acquire(&self.in_flight, &plan.project).ok_or_else(|| {
            warn!(project = %plan.project, "Build already in flight");
            OperationFault::conflict(format!("a build for project '{}' is already in flight", plan.project))
        })?;

        let run = BuildRun::new(&plan.project);
        self.remember(&run);
        Ok(Prepared::Admitted { run, plan, guard })
    }

    async fn drive(&self, mut run: BuildRun, plan: BuildPlan, _guard: FlightGuard, events: Events<'_>) -> BuildRun {
        let started = Instant::now();
        info!(
            build_id = %run.id,
            project = %plan.project,
            tag = %plan.tag,
            push = plan.push,
            deploy = plan.deploy,
            "Build started"
        );

        match self.steps(&mut run, &plan, events).await {
            Ok(()) => {
                run.succeed();
                info!(
                    build_id = %run.id,
                    image_id = run.image_id.as_deref().unwrap_or("-"),
                    tags = ?run.tags,
                    "Build succeeded"
                );
            }
            Err(fault) => {
                run.fail(fault);
                let at_step = run.current_step().unwrap_or(BuildStep::Pending);
                error!(
                    build_id = %run.id,
                    step = %at_step,
                    error = %run.fault().map(ToString::to_string).unwrap_or_default(),
                    "Build failed"
                );
            }
        }

        let outcome = if run.succeeded() { "succeeded" } else { "failed" };
        metrics::record_build(&plan.project, outcome, started.elapsed().as_secs_f64());
        self.remember(&run);
        emit(events, BuildEvent::Finished {
            run: Box::new(run.clone()),
        })
        .await;
        run
    }

    async fn steps(&self, run: &mut BuildRun, plan: &BuildPlan, events: Events<'_>) -> Result<(), OperationFault> {
        self.begin(run, BuildStep::Building, events).await;
        let image_id = self
            .follow_progress(
                run,
                BuildStep::Building,
                StreamCall::BuildImage {
                    context: plan.context.clone(),
                    dockerfile: plan.dockerfile.clone(),
                    tag: plan.tag.clone(),
                    no_cache: plan.no_cache,
                },
                events,
            )
            .await?;
        run.image_id = image_id;
        run.tags.push(plan.tag.clone());
        let detail = run.image_id.as_deref().map(|id| format!("image {}", short_id(id)));
        self.complete(run, BuildStep::Building, detail, events).await;

        if !plan.extra_tags.is_empty() {
            self.begin(run, BuildStep::Tagging, events).await;
            for tag in &plan.extra_tags {
                let (repo, name) = split_reference(tag);
                self.core
                    .executor()
                    .execute(DaemonCall::TagImage {
                        source: plan.tag.clone(),
                        repo,
                        tag: name,
                    })
                    .await?;
                run.tags.push(tag.clone());
            }
            let detail = format!("{} extra tag(s)", plan.extra_tags.len());
            self.complete(run, BuildStep::Tagging, Some(detail), events).await;
        }

        if plan.push {
            self.begin(run, BuildStep::Pushing, events).await;
            let pushed = plan.push_tags();
            for tag in &pushed {
                let (image, name) = split_reference(tag);
                self.follow_progress(run, BuildStep::Pushing, StreamCall::PushImage { image, tag: name }, events)
                    .await?;
            }
            let detail = format!("pushed {}", pushed.join(", "));
            self.complete(run, BuildStep::Pushing, Some(detail), events).await;
        }

        if plan.deploy {
            self.begin(run, BuildStep::Deploying, events).await;
            let container_id = self.deploy(plan).await?;
            let detail = format!("container {}", short_id(&container_id));
            run.container_id = Some(container_id);
            self.complete(run, BuildStep::Deploying, Some(detail), events).await;
        }

        Ok(())
    }

    /// Consume a build or push stream, relaying its output. Returns the image
    /// id announced by the daemon, if any.
    async fn follow_progress(
        &self,
        run: &BuildRun,
        step: BuildStep,
        call: StreamCall,
        events: Events<'_>,
    ) -> Result<Option<String>, OperationFault> {
        let operation = call.name();
        let idle = self.core.executor().settings().stream_idle_timeout;
        let mut stream = self.core.executor().open_stream(call).await?;
        let mut image_id = None;

        loop {
            let item = match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(item)) => item?,
                Ok(None) => break,
                Err(_) => return Err(DaemonFault::timeout(operation, idle).into()),
            };
            let StreamItem::Progress(raw) = item else {
                continue;
            };
            let event = ProgressEvent::from_raw(&raw);
            if let Some(error) = &event.error {
                return Err(OperationFault::upstream(error.clone()));
            }
            if event.image_id.is_some() {
                image_id = event.image_id.clone();
            }
            if let Some(line) = event.line() {
                debug!(build_id = %run.id, step = %step, "{}", line);
                emit(
                    events,
                    BuildEvent::Output {
                        build_id: run.id.clone(),
                        step,
                        line,
                    },
                )
                .await;
            }
        }

        Ok(image_id)
    }

    /// Replace the project's deploy container with one from the new image.
    async fn deploy(&self, plan: &BuildPlan) -> Result<String, OperationFault> {
        let descriptor = self
            .core
            .validation()
            .projects()
            .get(&plan.project)
            .cloned()
            .ok_or_else(|| OperationFault::not_found(plan.project.clone()))?;
        let name = descriptor.container_name();
        let settings = &descriptor.deploy;

        let mut request = OperationRequest::container(plan.tag.clone(), ContainerActionKind::Create)
            .with_option("name", name.clone());
        for (container_port, host_port) in &settings.ports {
            request = request.with_option(format!("port.{}", container_port), i64::from(*host_port));
        }
        for (key, value) in &settings.env {
            request = request.with_option(format!("env.{}", key), value.clone());
        }
        if let Some(policy) = &settings.restart_policy {
            request = request.with_option("restart_policy", policy.clone());
        }
        if let Some(network) = &settings.network {
            request = request.with_option("network", network.clone());
        }

        // Admit before touching the running container.
        let spec = match self.core.admit(&request)? {
            ValidatedOperation::CreateContainer { spec, .. } => spec,
            other => {
                return Err(OperationFault::upstream(format!(
                    "unexpected validated operation: {:?}",
                    other
                )))
            }
        };

        match self
            .core
            .executor()
            .execute(DaemonCall::RemoveContainer {
                id: name.clone(),
                force: true,
                volumes: false,
            })
            .await
        {
            Ok(_) => info!(container = %name, "Removed previous deploy container"),
            Err(DaemonFault::NotFound { .. }) => {}
            Err(fault) => return Err(fault.into()),
        }

        let (_, id) = self.core.create("build.deploy", spec, true).await?;
        info!(project = %plan.project, container = %name, id = %short_id(&id), "Project deployed");
        Ok(id)
    }

    async fn begin(&self, run: &mut BuildRun, step: BuildStep, events: Events<'_>) {
        run.begin(step);
        self.remember(run);
        debug!(build_id = %run.id, step = %step, "Build step started");
        emit(
            events,
            BuildEvent::StepStarted {
                build_id: run.id.clone(),
                step,
            },
        )
        .await;
    }

    async fn complete(&self, run: &mut BuildRun, step: BuildStep, detail: Option<String>, events: Events<'_>) {
        run.complete_step(detail);
        self.remember(run);
        emit(
            events,
            BuildEvent::StepCompleted {
                build_id: run.id.clone(),
                step,
            },
        )
        .await;
    }

    fn remember(&self, run: &BuildRun) {
        self.history.lock().put(run.id.clone(), run.clone());
    }
}

async fn emit(events: Events<'_>, event: BuildEvent) {
    if let Some(relay) = events {
        relay.send(event).await;
    }
}

/// `repo[:tag]` split on the last `:` after the last `/`; the tag defaults
/// to `latest`.
fn split_reference(reference: &str) -> (String, String) {
    let segment_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[segment_start..].rfind(':') {
        Some(i) => {
            let split = segment_start + i;
            (reference[..split].to_string(), reference[split + 1..].to_string())
        }
        None => (reference.to_string(), "latest".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_reference() {
        assert_eq!(split_reference("ocr:1.0"), ("ocr".to_string(), "1.0".to_string()));
        assert_eq!(
            split_reference("localhost:5000/team/ocr"),
            ("localhost:5000/team/ocr".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_reference("localhost:5000/team/ocr:rc1"),
            ("localhost:5000/team/ocr".to_string(), "rc1".to_string())
        );
    }

    #[test]
    fn test_flight_guard_is_exclusive_until_dropped() {
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let first = FlightGuard::acquire(&in_flight, "ocr");
        assert!(first.is_some());
        assert!(FlightGuard::acquire(&in_flight, "ocr").is_none());
        assert!(FlightGuard::acquire(&in_flight, "web").is_some());
        drop(first);
        assert!(FlightGuard::acquire(&in_flight, "ocr").is_some());
    }
}
