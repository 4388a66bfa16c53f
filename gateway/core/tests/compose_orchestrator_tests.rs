// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for compose projects.
//!
//! These tests verify:
//! 1. Services deploy dependencies first, as `{project}-{service}`, on project networks
//! 2. One refused service refuses the whole project before any daemon call
//! 3. `ps` and `logs` only see containers labelled with the project
//! 4. `down` removes the project's containers and networks and nothing else

mod common;

use common::{stack, FakeDaemon};
use gatehouse_core::domain::compose::ComposeFile;
use gatehouse_core::domain::daemon::DaemonCall;
use gatehouse_core::domain::policy::PolicyViolationKind;
use gatehouse_core::domain::result::ContainerStatus;

const SHOP: &str = r#"
services:
  api:
    image: registry.local/api:1.2
    command: sh -c 'exec gunicorn -b 0.0.0.0:8000 app:app'
    environment:
      DATABASE_HOST: shop-db
    ports:
      - "18000:8000"
    depends_on: [db]
    networks: [backend]
  db:
    image: postgres:16
    environment:
      - POSTGRES_DB=shop
    volumes:
      - /srv/data/pg:/var/lib/postgresql/data
    networks: [backend]
  cache:
    image: redis:7
networks:
  backend:
"#;

fn shop() -> ComposeFile {
    ComposeFile::from_yaml_str(SHOP).unwrap()
}

fn created_names(calls: &[DaemonCall]) -> Vec<String> {
    calls
        .iter()
        .filter_map(|call| match call {
            DaemonCall::CreateContainer { spec } => spec.name.clone(),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_up_deploys_dependencies_first() {
    let stack = stack(FakeDaemon::new());

    let report = stack.compose.up("shop", &shop(), &[]).await.unwrap();

    assert!(report.success(), "{:?}", report.errors);
    assert_eq!(created_names(&stack.daemon.calls()), vec!["shop-db", "shop-api", "shop-cache"]);
    assert_eq!(report.networks, vec!["shop_backend", "shop_default"]);
    assert_eq!(stack.daemon.network_names(), vec!["shop_backend", "shop_default"]);
    assert!(report.deployed.iter().all(|d| d.status == "running"));
    assert_eq!(stack.daemon.state_of("shop-api").as_deref(), Some("running"));

    let labels = stack.daemon.labels_of("shop-api");
    assert_eq!(labels["com.docker.compose.project"], "shop");
    assert_eq!(labels["com.docker.compose.service"], "api");

    let api = stack
        .daemon
        .calls()
        .into_iter()
        .find_map(|call| match call {
            DaemonCall::CreateContainer { spec } if spec.name.as_deref() == Some("shop-api") => Some(spec),
            _ => None,
        })
        .unwrap();
    assert_eq!(api.network.as_deref(), Some("shop_backend"));
    assert_eq!(api.ports.get(&8000), Some(&18000));
    assert_eq!(
        api.command,
        Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            "exec gunicorn -b 0.0.0.0:8000 app:app".to_string()
        ])
    );
}

#[tokio::test]
async fn test_selected_service_brings_dependencies() {
    let stack = stack(FakeDaemon::new());

    let report = stack
        .compose
        .up("shop", &shop(), &["api".to_string()])
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(created_names(&stack.daemon.calls()), vec!["shop-db", "shop-api"]);
    assert_eq!(report.networks, vec!["shop_backend"]);
}

#[tokio::test]
async fn test_one_refused_service_refuses_the_project() {
    let stack = stack(FakeDaemon::new());
    let file = ComposeFile::from_yaml_str(
        "services:\n  web:\n    image: nginx:1.27\n  shell:\n    image: alpine\n    volumes: ['/etc:/host-etc']\n",
    )
    .unwrap();

    let fault = stack.compose.up("shop", &file, &[]).await.unwrap_err();

    assert_eq!(fault.policy_kind(), Some(PolicyViolationKind::UnauthorizedMount));
    assert!(fault.to_string().contains("shell"), "{}", fault);
    assert!(stack.daemon.calls().is_empty());
}

#[tokio::test]
async fn test_privileged_service_is_refused() {
    let stack = stack(FakeDaemon::new());
    let file = ComposeFile::from_yaml_str("services:\n  box:\n    image: alpine\n    pid: host\n").unwrap();

    let fault = stack.compose.up("shop", &file, &[]).await.unwrap_err();

    assert_eq!(fault.policy_kind(), Some(PolicyViolationKind::PrivilegeEscalation));
    assert!(stack.daemon.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_project_name() {
    let stack = stack(FakeDaemon::new());

    for project in ["Shop", "../shop", "shop;rm"] {
        let fault = stack.compose.up(project, &shop(), &[]).await.unwrap_err();
        assert_eq!(fault.policy_kind(), Some(PolicyViolationKind::InvalidIdentifier), "{}", project);
        let fault = stack.compose.down(project, false).await.unwrap_err();
        assert_eq!(fault.policy_kind(), Some(PolicyViolationKind::InvalidIdentifier), "{}", project);
    }
    assert!(stack.daemon.calls().is_empty());
}

#[tokio::test]
async fn test_up_again_replaces_containers_and_reuses_networks() {
    let stack = stack(FakeDaemon::new());
    stack.compose.up("shop", &shop(), &[]).await.unwrap();

    let report = stack.compose.up("shop", &shop(), &[]).await.unwrap();

    assert!(report.success(), "{:?}", report.errors);
    assert_eq!(report.networks, vec!["shop_backend", "shop_default"]);
    assert!(stack.daemon.calls().contains(&DaemonCall::RemoveContainer {
        id: "shop-api".to_string(),
        force: true,
        volumes: false,
    }));
    assert_eq!(stack.daemon.state_of("shop-api").as_deref(), Some("running"));
}

#[tokio::test]
async fn test_ps_and_logs_see_only_the_project() {
    let daemon = FakeDaemon::new().with_container("unrelated", "running");
    let stack = stack(daemon);
    stack.compose.up("shop", &shop(), &[]).await.unwrap();

    let containers = stack.compose.ps("shop").await.unwrap();
    let services: Vec<&str> = containers.iter().map(|c| c.service.as_str()).collect();
    assert_eq!(services, vec!["api", "cache", "db"]);
    assert!(containers.iter().all(|c| c.state == ContainerStatus::Running));
    assert!(containers.iter().all(|c| c.name.starts_with("shop-")));

    let logs = stack.compose.logs("shop", &["db".to_string()], Some(10)).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].container, "shop-db");
    assert_eq!(logs[0].lines.len(), 3);
    assert!(logs[0].error.is_none());

    assert!(stack.compose.ps("empty").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_down_removes_project_only() {
    let daemon = FakeDaemon::new().with_container("unrelated", "running");
    let stack = stack(daemon);
    stack.compose.up("shop", &shop(), &[]).await.unwrap();
    stack.compose.up("blog", &ComposeFile::from_yaml_str("services:\n  web:\n    image: nginx:1.27\n").unwrap(), &[]).await.unwrap();

    let report = stack.compose.down("shop", true).await.unwrap();

    assert!(report.success(), "{:?}", report.errors);
    let mut removed = report.removed_containers.clone();
    removed.sort();
    assert_eq!(removed, vec!["shop-api", "shop-cache", "shop-db"]);
    assert_eq!(report.removed_networks, vec!["shop_backend", "shop_default"]);

    assert!(stack.daemon.state_of("shop-api").is_none());
    assert_eq!(stack.daemon.state_of("blog-web").as_deref(), Some("running"));
    assert_eq!(stack.daemon.state_of("unrelated").as_deref(), Some("running"));
    assert_eq!(stack.daemon.network_names(), vec!["blog_default"]);
    assert!(stack.daemon.calls().contains(&DaemonCall::StopContainer {
        id: "shop-db".to_string(),
        timeout_secs: 10,
    }));
}
