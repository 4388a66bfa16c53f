// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the build orchestrator.
//!
//! These tests verify:
//! 1. Unregistered projects fail at `Pending` without a daemon call
//! 2. One build per project at a time (single-flight)
//! 3. Step sequencing and partial failure bookkeeping
//! 4. Deploy goes through the same validation as `create`
//! 5. Event streaming and the status history

mod common;

use common::{stack, FakeDaemon, BUILT_IMAGE};
use futures::StreamExt;
use gatehouse_core::domain::build::{BuildEvent, BuildState, BuildStep};
use gatehouse_core::domain::daemon::{DaemonCall, StreamCall};
use gatehouse_core::domain::policy::PolicyViolationKind;
use gatehouse_core::domain::request::{OptionMap, OptionValue};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn options(pairs: &[(&str, OptionValue)]) -> OptionMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_unknown_project_fails_at_pending() {
    let stack = stack(FakeDaemon::new());

    let run = stack.builds.run_build("mystery", OptionMap::new()).await.unwrap();

    assert!(matches!(
        run.state,
        BuildState::Failed {
            at_step: BuildStep::Pending,
            ..
        }
    ));
    assert_eq!(run.rejection(), Some(PolicyViolationKind::UnknownProject));
    assert!(stack.daemon.calls().is_empty());
    assert!(stack.daemon.streams().is_empty());
}

#[tokio::test]
async fn test_caller_supplied_path_is_refused() {
    let stack = stack(FakeDaemon::new());

    let run = stack
        .builds
        .run_build("ocr", options(&[("path", "/etc".into())]))
        .await
        .unwrap();

    assert_eq!(run.rejection(), Some(PolicyViolationKind::UnknownProject));
    assert!(stack.daemon.streams().is_empty());
}

#[tokio::test]
async fn test_build_only() {
    let stack = stack(FakeDaemon::new());

    let run = stack.builds.run_build("web", OptionMap::new()).await.unwrap();

    assert!(run.succeeded(), "{:?}", run.state);
    assert_eq!(run.completed_steps(), vec![BuildStep::Building]);
    assert_eq!(run.image_id.as_deref(), Some(BUILT_IMAGE));
    assert_eq!(run.tags, vec!["web:latest"]);
    assert!(run.container_id.is_none());
    assert_eq!(
        stack.daemon.streams(),
        vec![StreamCall::BuildImage {
            context: "/projects/web".into(),
            dockerfile: "Dockerfile".to_string(),
            tag: "web:latest".to_string(),
            no_cache: false,
        }]
    );
}

#[tokio::test]
async fn test_concurrent_builds_single_flight() {
    let daemon = FakeDaemon::new();
    daemon.delay_builds(Duration::from_millis(100));
    let stack = stack(daemon);

    let (first, second) = tokio::join!(
        stack.builds.run_build("ocr", OptionMap::new()),
        stack.builds.run_build("ocr", OptionMap::new()),
    );

    let outcomes = [first, second];
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(fault) if fault.is_conflict()))
        .count();
    let builds = outcomes
        .iter()
        .filter(|r| matches!(r, Ok(run) if run.reached(BuildStep::Building)))
        .count();
    assert_eq!(conflicts, 1);
    assert_eq!(builds, 1);
    assert_eq!(stack.daemon.streams().len(), 1);
    assert!(stack.builds.in_flight().is_empty());

    // The slot is released once the first build is done.
    let again = stack.builds.run_build("ocr", OptionMap::new()).await.unwrap();
    assert!(again.succeeded());
}

#[tokio::test]
async fn test_different_projects_build_concurrently() {
    let daemon = FakeDaemon::new();
    daemon.delay_builds(Duration::from_millis(50));
    let stack = stack(daemon);

    let (ocr, web) = tokio::join!(
        stack.builds.run_build("ocr", OptionMap::new()),
        stack.builds.run_build("web", OptionMap::new()),
    );

    assert!(ocr.unwrap().succeeded());
    assert!(web.unwrap().succeeded());
}

#[tokio::test]
async fn test_build_tag_and_deploy() {
    let stack = stack(FakeDaemon::new().with_container("ocr-service", "running"));

    let run = stack
        .builds
        .run_build(
            "ocr",
            options(&[("tags", "ocr:1.4".into()), ("deploy", true.into())]),
        )
        .await
        .unwrap();

    assert!(run.succeeded(), "{:?}", run.state);
    assert_eq!(
        run.completed_steps(),
        vec![BuildStep::Building, BuildStep::Tagging, BuildStep::Deploying]
    );
    assert_eq!(run.tags, vec!["ocr:latest", "ocr:1.4"]);
    assert_eq!(run.container_id.as_deref(), Some("ocr-service"));
    assert_eq!(stack.daemon.state_of("ocr-service").as_deref(), Some("running"));

    let calls = stack.daemon.calls();
    assert!(calls.contains(&DaemonCall::TagImage {
        source: "ocr:latest".to_string(),
        repo: "ocr".to_string(),
        tag: "1.4".to_string(),
    }));
    let removed = calls
        .iter()
        .position(|c| matches!(c, DaemonCall::RemoveContainer { id, .. } if id == "ocr-service"))
        .unwrap();
    let created = calls
        .iter()
        .position(|c| matches!(c, DaemonCall::CreateContainer { .. }))
        .unwrap();
    assert!(removed < created);

    let spec = match &calls[created] {
        DaemonCall::CreateContainer { spec } => spec.clone(),
        _ => unreachable!(),
    };
    assert_eq!(spec.image, "ocr:latest");
    assert_eq!(spec.ports.get(&8000), Some(&18000));
    assert_eq!(spec.env.get("OCR_LANG").map(String::as_str), Some("eng"));
}

#[tokio::test]
async fn test_deploy_without_existing_container() {
    let stack = stack(FakeDaemon::new());

    let run = stack
        .builds
        .run_build("ocr", options(&[("deploy", true.into())]))
        .await
        .unwrap();

    assert!(run.succeeded(), "{:?}", run.state);
    assert_eq!(stack.daemon.state_of("ocr-service").as_deref(), Some("running"));
}

#[tokio::test]
async fn test_push_failure_keeps_earlier_results() {
    let daemon = FakeDaemon::new();
    daemon.fail_pushes("denied: requested access to the resource is denied");
    let stack = stack(daemon);

    let run = stack
        .builds
        .run_build(
            "ocr",
            options(&[
                ("tags", "registry.local/ocr:1.4".into()),
                ("push", true.into()),
                ("deploy", true.into()),
            ]),
        )
        .await
        .unwrap();

    assert!(matches!(
        run.state,
        BuildState::Failed {
            at_step: BuildStep::Pushing,
            ..
        }
    ));
    assert_eq!(run.completed_steps(), vec![BuildStep::Building, BuildStep::Tagging]);
    assert_eq!(run.image_id.as_deref(), Some(BUILT_IMAGE));
    assert!(!run.reached(BuildStep::Deploying));
    assert!(!stack
        .daemon
        .calls()
        .iter()
        .any(|c| matches!(c, DaemonCall::CreateContainer { .. })));
}

#[tokio::test]
async fn test_push_sends_only_qualified_tags() {
    let stack = stack(FakeDaemon::new());

    let run = stack
        .builds
        .run_build(
            "web",
            options(&[
                ("tags", "web:1.4, registry.local:5000/team/web:1.4".into()),
                ("push", true.into()),
            ]),
        )
        .await
        .unwrap();

    assert!(run.succeeded(), "{:?}", run.state);
    assert_eq!(run.tags, vec!["web:latest", "web:1.4", "registry.local:5000/team/web:1.4"]);
    let pushes: Vec<StreamCall> = stack
        .daemon
        .streams()
        .into_iter()
        .filter(|s| matches!(s, StreamCall::PushImage { .. }))
        .collect();
    assert_eq!(
        pushes,
        vec![StreamCall::PushImage {
            image: "registry.local:5000/team/web".to_string(),
            tag: "1.4".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_push_of_bare_default_tag_is_refused() {
    let stack = stack(FakeDaemon::new());

    let run = stack
        .builds
        .run_build("web", options(&[("push", true.into())]))
        .await
        .unwrap();

    assert_eq!(run.rejection(), Some(PolicyViolationKind::ParameterOutOfRange));
    assert!(stack.daemon.streams().is_empty());
}

#[tokio::test]
async fn test_start_build_streams_events() {
    let stack = stack(FakeDaemon::new());

    let handle = stack
        .builds
        .start_build("web", OptionMap::new(), CancellationToken::new())
        .unwrap();
    let build_id = handle.build_id.clone();
    let (_, events, join) = handle.into_parts();

    let events: Vec<BuildEvent> = events.collect().await;
    let run = join.await.unwrap();

    assert!(matches!(
        events.first(),
        Some(BuildEvent::StepStarted {
            step: BuildStep::Building,
            ..
        })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, BuildEvent::Output { line, .. } if line.starts_with("Step 1/2"))));
    assert!(matches!(events.last(), Some(BuildEvent::Finished { run }) if run.succeeded()));
    assert_eq!(run.id, build_id);
    assert_eq!(stack.builds.build_status(&build_id).unwrap(), run);
}

#[tokio::test]
async fn test_cancel_detaches_observer_only() {
    let daemon = FakeDaemon::new();
    daemon.delay_builds(Duration::from_millis(50));
    let stack = stack(daemon);
    let cancel = CancellationToken::new();

    let handle = stack
        .builds
        .start_build("web", OptionMap::new(), cancel.clone())
        .unwrap();
    cancel.cancel();
    let run = handle.wait().await.unwrap();

    assert!(run.succeeded());
}

#[tokio::test]
async fn test_start_build_rejection_is_reported_as_run() {
    let stack = stack(FakeDaemon::new());

    let handle = stack
        .builds
        .start_build("mystery", OptionMap::new(), CancellationToken::new())
        .unwrap();
    let run = handle.wait().await.unwrap();

    assert_eq!(run.rejection(), Some(PolicyViolationKind::UnknownProject));
    assert_eq!(stack.builds.build_status(&run.id).unwrap(), run);
}

#[tokio::test]
async fn test_build_status_of_unknown_id() {
    let stack = stack(FakeDaemon::new());

    let err = stack.builds.build_status("ocr-unknown").unwrap_err();

    assert!(err.is_not_found());
}
