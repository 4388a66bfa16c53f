// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Compose files.
//!
//! A compose file names a set of services deployed together under one
//! project name. Services are never run as written: each one becomes an
//! ordinary container `run` request and is admitted like any other, so the
//! accepted subset of compose is exactly what the policy can express.
//!
//! Containers carry the `com.docker.compose.*` labels so the project can be
//! found again by `ps`, `logs` and `down`.

use crate::domain::policy::PolicyViolation;
use crate::domain::request::{ContainerActionKind, OperationRequest, OptionValue};
use crate::domain::result::{ContainerStatus, LogLine};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

pub const PROJECT_LABEL: &str = "com.docker.compose.project";
pub const SERVICE_LABEL: &str = "com.docker.compose.service";
pub const NETWORK_LABEL: &str = "com.docker.compose.network";

/// Network every service joins unless it names another.
pub const DEFAULT_NETWORK: &str = "default";

/// Service keys mapped onto create options the policy judges (and refuses).
const GUARDED_KEYS: &[(&str, &str)] = &[
    ("pid", "pid_mode"),
    ("ipc", "ipc_mode"),
    ("security_opt", "security_opt"),
    ("devices", "devices"),
    ("userns_mode", "userns_mode"),
];

/// Service keys with no effect on what the container can reach.
const IGNORED_KEYS: &[&str] = &[
    "expose",
    "healthcheck",
    "logging",
    "stop_grace_period",
    "stop_signal",
    "tty",
    "stdin_open",
    "init",
];

#[derive(Debug, Error)]
pub enum ComposeFileError {
    #[error("Failed to read compose file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML in compose file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("No services defined in compose file")]
    NoServices,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComposeFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,

    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,

    /// `backend:` with an empty body parses as `None`
    #[serde(default)]
    pub networks: BTreeMap<String, Option<ComposeNetwork>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComposeNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,

    /// Pre-existing network; joined, never created or removed.
    #[serde(default)]
    pub external: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComposeService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandLine>,

    #[serde(default)]
    pub environment: Environment,

    /// `"8080:80"`, `"80"` or `80`
    #[serde(default)]
    pub ports: Vec<Value>,

    /// `source:target[:ro]`
    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub networks: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    #[serde(default)]
    pub depends_on: DependsOn,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,

    /// `512m` or a byte count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<Value>,

    #[serde(default)]
    pub privileged: bool,

    #[serde(default)]
    pub cap_add: Vec<String>,

    /// Everything else the file says about the service.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Argv(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    /// `KEY=value` entries
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

impl Default for Environment {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl Environment {
    /// Entries without `=` name host variables to pass through and are
    /// skipped; the gateway's own environment is not forwarded.
    pub fn pairs(&self) -> Vec<(String, String)> {
        match self {
            Self::List(entries) => entries
                .iter()
                .filter_map(|entry| entry.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Self::Map(map) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), scalar_text(v)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    List(Vec<String>),
    /// Long form; conditions are not evaluated, only the ordering is kept.
    Map(BTreeMap<String, Value>),
}

impl Default for DependsOn {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl DependsOn {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Map(map) => map.keys().map(String::as_str).collect(),
        }
    }
}

/// A network the project needs on the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectNetwork {
    /// Key in the compose file
    pub key: String,
    /// Daemon-side name
    pub name: String,
    pub driver: String,
    pub external: bool,
}

impl ComposeFile {
    pub fn from_yaml_str(content: &str) -> Result<Self, ComposeFileError> {
        let file: Self = serde_yaml::from_str(content)?;
        if file.services.is_empty() {
            return Err(ComposeFileError::NoServices);
        }
        Ok(file)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ComposeFileError> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    /// Services to deploy, dependencies first. An empty selection means
    /// every service; a selected service brings its dependencies along.
    pub fn deploy_order(&self, selected: &[String]) -> Result<Vec<String>, PolicyViolation> {
        let roots: Vec<&str> = if selected.is_empty() {
            self.services.keys().map(String::as_str).collect()
        } else {
            selected.iter().map(String::as_str).collect()
        };

        let mut order = Vec::new();
        let mut done = BTreeSet::new();
        for root in roots {
            self.visit(root, &mut Vec::new(), &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        service: &'a str,
        path: &mut Vec<&'a str>,
        done: &mut BTreeSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), PolicyViolation> {
        if done.contains(service) {
            return Ok(());
        }
        if path.contains(&service) {
            path.push(service);
            return Err(PolicyViolation::out_of_range(format!(
                "dependency cycle between services: {}",
                path.join(" -> ")
            )));
        }
        let definition = self.services.get(service).ok_or_else(|| {
            PolicyViolation::out_of_range(format!("service '{}' is not defined in the compose file", service))
        })?;

        path.push(service);
        for dependency in definition.depends_on.names() {
            self.visit(dependency, path, done, order)?;
        }
        path.pop();

        done.insert(service);
        order.push(service.to_string());
        Ok(())
    }

    /// Daemon-side name of the network declared under `key`.
    pub fn network_name(&self, project: &str, key: &str) -> String {
        match self.networks.get(key).and_then(Option::as_ref) {
            Some(network) if network.external => network.name.clone().unwrap_or_else(|| key.to_string()),
            _ => format!("{}_{}", project, key),
        }
    }

    /// Network `service` is attached to at creation; `None` when it sets
    /// its own `network_mode`. Only the first listed network is joined.
    pub fn service_network(&self, project: &str, service: &str) -> Result<Option<String>, PolicyViolation> {
        let Some(definition) = self.services.get(service) else {
            return Err(PolicyViolation::out_of_range(format!(
                "service '{}' is not defined in the compose file",
                service
            )));
        };
        if definition.network_mode.is_some() {
            return Ok(None);
        }
        match definition.networks.first() {
            Some(key) if !self.networks.contains_key(key) => Err(PolicyViolation::out_of_range(format!(
                "service '{}' joins undeclared network '{}'",
                service, key
            ))),
            Some(key) => Ok(Some(self.network_name(project, key))),
            None => Ok(Some(self.network_name(project, DEFAULT_NETWORK))),
        }
    }

    /// Networks used by `services`, in first-use order.
    pub fn project_networks(&self, project: &str, services: &[String]) -> Result<Vec<ProjectNetwork>, PolicyViolation> {
        let mut networks: Vec<ProjectNetwork> = Vec::new();
        for service in services {
            let Some(definition) = self.services.get(service) else {
                continue;
            };
            if definition.network_mode.is_some() {
                continue;
            }
            let key = definition
                .networks
                .first()
                .map(String::as_str)
                .unwrap_or(DEFAULT_NETWORK);
            if networks.iter().any(|n| n.key == key) {
                continue;
            }

            let declared = self.networks.get(key).cloned().flatten().unwrap_or_default();
            let driver = declared.driver.clone().unwrap_or_else(|| "bridge".to_string());
            if !declared.external && driver != "bridge" {
                return Err(PolicyViolation::out_of_range(format!(
                    "network '{}' uses driver '{}'; only bridge networks are created",
                    key, driver
                )));
            }
            networks.push(ProjectNetwork {
                key: key.to_string(),
                name: self.network_name(project, key),
                driver,
                external: declared.external,
            });
        }
        Ok(networks)
    }
}

impl ComposeService {
    /// Keys present that are accepted but have no effect.
    pub fn ignored_keys(&self) -> Vec<&str> {
        self.other
            .keys()
            .map(String::as_str)
            .filter(|k| IGNORED_KEYS.contains(k))
            .collect()
    }

    /// The `run` request deploying this service as `{project}-{service}`.
    pub fn request(&self, project: &str, service: &str, network: Option<&str>) -> Result<OperationRequest, PolicyViolation> {
        for key in self.other.keys() {
            if IGNORED_KEYS.contains(&key.as_str()) || GUARDED_KEYS.iter().any(|(k, _)| k == key) {
                continue;
            }
            let detail = match key.as_str() {
                "build" => format!("service '{}' builds an image; build registered projects instead", service),
                "container_name" => format!("service '{}' sets container_name; names are always {}-{}", service, project, service),
                _ => format!("service '{}' uses unsupported compose key '{}'", service, key),
            };
            return Err(PolicyViolation::out_of_range(detail));
        }

        let image = self
            .image
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .ok_or_else(|| PolicyViolation::out_of_range(format!("service '{}' has no image", service)))?;

        let mut request = OperationRequest::container(image, ContainerActionKind::Run)
            .with_option("name", container_name(project, service))
            .with_option(format!("label.{}", PROJECT_LABEL), project)
            .with_option(format!("label.{}", SERVICE_LABEL), service);

        for (key, value) in &self.labels {
            if key.starts_with("com.docker.compose.") {
                return Err(PolicyViolation::out_of_range(format!("label '{}' is reserved", key)));
            }
            request = request.with_option(format!("label.{}", key), value.clone());
        }
        for (key, value) in self.environment.pairs() {
            request = request.with_option(format!("env.{}", key), value);
        }
        for port in &self.ports {
            let (container, host) = port_mapping(port)?;
            request = request.with_option(format!("port.{}", container), host);
        }
        for (i, volume) in self.volumes.iter().enumerate() {
            request = request.with_option(format!("mount.{}", i), volume.clone());
        }

        match &self.command {
            Some(CommandLine::Line(line)) => request = request.with_option("command", line.clone()),
            Some(CommandLine::Argv(argv)) => {
                let line = shlex::try_join(argv.iter().map(String::as_str)).map_err(|_| {
                    PolicyViolation::invalid_identifier(format!("command of service '{}' contains a NUL byte", service))
                })?;
                request = request.with_option("command", line);
            }
            None => {}
        }

        match (&self.network_mode, network) {
            (Some(mode), _) => request = request.with_option("network_mode", mode.clone()),
            (None, Some(network)) => request = request.with_option("network", network),
            (None, None) => {}
        }

        if let Some(restart) = &self.restart {
            request = request.with_option("restart_policy", restart.clone());
        }
        if let Some(dir) = &self.working_dir {
            request = request.with_option("working_dir", dir.clone());
        }
        if let Some(user) = &self.user {
            request = request.with_option("user", user.clone());
        }
        if let Some(cpus) = self.cpus {
            request = request.with_option("cpus", cpus);
        }
        if let Some(memory) = &self.mem_limit {
            let value = match memory.as_i64() {
                Some(bytes) => OptionValue::Int(bytes),
                None => OptionValue::Text(scalar_text(memory)),
            };
            request = request.with_option("memory", value);
        }
        if self.privileged {
            request = request.with_option("privileged", true);
        }
        if !self.cap_add.is_empty() {
            request = request.with_option("cap_add", self.cap_add.join(","));
        }
        for (key, option) in GUARDED_KEYS {
            if let Some(value) = self.other.get(*key) {
                request = request.with_option(*option, scalar_text(value));
            }
        }

        Ok(request)
    }
}

pub fn container_name(project: &str, service: &str) -> String {
    format!("{}-{}", project, service)
}

/// `container` key and host port of one `ports` entry.
fn port_mapping(entry: &Value) -> Result<(String, i64), PolicyViolation> {
    let text = scalar_text(entry);
    let invalid = || PolicyViolation::out_of_range(format!("unsupported port mapping: {}", text));
    let parts: Vec<&str> = text.split(':').collect();
    match parts.as_slice() {
        [container] => {
            let host = container.trim_end_matches("/tcp").parse::<i64>().map_err(|_| invalid())?;
            Ok((container.to_string(), host))
        }
        [host, container] => {
            let host = host.parse::<i64>().map_err(|_| invalid())?;
            Ok((container.to_string(), host))
        }
        [_, _, _] => Err(PolicyViolation::out_of_range(format!(
            "host address bindings are not supported: {}",
            text
        ))),
        _ => Err(invalid()),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Sequence(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(","),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedService {
    pub service: String,
    pub container_id: String,
    pub container_name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComposeUpReport {
    pub project: String,
    pub deployed: Vec<DeployedService>,
    pub networks: Vec<String>,
    /// Daemon faults, one per failed service or network
    pub errors: Vec<String>,
}

impl ComposeUpReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComposeDownReport {
    pub project: String,
    pub removed_containers: Vec<String>,
    pub removed_networks: Vec<String>,
    pub errors: Vec<String>,
}

impl ComposeDownReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContainer {
    pub service: String,
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerStatus,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLogs {
    pub service: String,
    pub container: String,
    pub lines: Vec<LogLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::PolicyViolationKind;

    const STACK: &str = r#"
version: "3.8"
services:
  api:
    image: registry.local/api:1.2
    command: ["gunicorn", "-b", "0.0.0.0:8000", "app:create_app()"]
    environment:
      DATABASE_HOST: db
      WORKERS: 4
    ports:
      - "18000:8000"
    depends_on:
      - db
    networks: [backend]
    restart: unless-stopped
  db:
    image: postgres:16
    environment:
      - POSTGRES_DB=app
      - HOME
    volumes:
      - /srv/data/pg:/var/lib/postgresql/data
    networks: [backend]
    healthcheck:
      test: ["CMD", "pg_isready"]
  cache:
    image: redis:7
    ports: [6379]
networks:
  backend:
"#;

    fn stack() -> ComposeFile {
        ComposeFile::from_yaml_str(STACK).unwrap()
    }

    #[test]
    fn test_parse_and_reject_empty() {
        let file = stack();
        assert_eq!(file.services.len(), 3);
        assert_eq!(file.services["db"].ignored_keys(), vec!["healthcheck"]);
        assert!(matches!(
            ComposeFile::from_yaml_str("version: '3'\nservices: {}\n"),
            Err(ComposeFileError::NoServices)
        ));
        assert!(matches!(ComposeFile::from_yaml_str("services: ["), Err(ComposeFileError::Yaml(_))));
    }

    #[test]
    fn test_environment_forms() {
        let file = stack();
        assert_eq!(
            file.services["api"].environment.pairs(),
            vec![
                ("DATABASE_HOST".to_string(), "db".to_string()),
                ("WORKERS".to_string(), "4".to_string())
            ]
        );
        assert_eq!(
            file.services["db"].environment.pairs(),
            vec![("POSTGRES_DB".to_string(), "app".to_string())]
        );
    }

    #[test]
    fn test_deploy_order_puts_dependencies_first() {
        let file = stack();
        assert_eq!(file.deploy_order(&[]).unwrap(), vec!["db", "api", "cache"]);
        assert_eq!(file.deploy_order(&["api".to_string()]).unwrap(), vec!["db", "api"]);

        let unknown = file.deploy_order(&["worker".to_string()]).unwrap_err();
        assert_eq!(unknown.kind, PolicyViolationKind::ParameterOutOfRange);
    }

    #[test]
    fn test_dependency_cycle() {
        let file = ComposeFile::from_yaml_str(
            "services:\n  a:\n    image: alpine\n    depends_on: [b]\n  b:\n    image: alpine\n    depends_on:\n      a:\n        condition: service_started\n",
        )
        .unwrap();
        let err = file.deploy_order(&[]).unwrap_err();
        assert!(err.detail.contains("a -> b -> a"), "{}", err.detail);
    }

    #[test]
    fn test_networks() {
        let file = stack();
        assert_eq!(file.service_network("shop", "api").unwrap().as_deref(), Some("shop_backend"));
        assert_eq!(file.service_network("shop", "cache").unwrap().as_deref(), Some("shop_default"));

        let order = file.deploy_order(&[]).unwrap();
        let networks = file.project_networks("shop", &order).unwrap();
        let names: Vec<&str> = networks.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["shop_backend", "shop_default"]);
        assert!(networks.iter().all(|n| n.driver == "bridge" && !n.external));

        let overlay = ComposeFile::from_yaml_str(
            "services:\n  a:\n    image: alpine\n    networks: [mesh]\nnetworks:\n  mesh:\n    driver: macvlan\n",
        )
        .unwrap();
        assert!(overlay.project_networks("shop", &["a".to_string()]).is_err());

        let external = ComposeFile::from_yaml_str(
            "services:\n  a:\n    image: alpine\n    networks: [edge]\nnetworks:\n  edge:\n    external: true\n    name: proxy\n",
        )
        .unwrap();
        assert_eq!(external.service_network("shop", "a").unwrap().as_deref(), Some("proxy"));
    }

    #[test]
    fn test_service_request_options() {
        let file = stack();
        let request = file.services["api"].request("shop", "api", Some("shop_backend")).unwrap();
        assert_eq!(request.target(), "registry.local/api:1.2");
        let options = request.options();
        assert_eq!(options["name"], OptionValue::Text("shop-api".to_string()));
        assert_eq!(options["label.com.docker.compose.project"], OptionValue::Text("shop".to_string()));
        assert_eq!(options["label.com.docker.compose.service"], OptionValue::Text("api".to_string()));
        assert_eq!(options["port.8000"], OptionValue::Int(18000));
        assert_eq!(options["network"], OptionValue::Text("shop_backend".to_string()));
        assert_eq!(options["restart_policy"], OptionValue::Text("unless-stopped".to_string()));
        let command = options["command"].as_text().unwrap();
        assert_eq!(
            shlex::split(command).unwrap(),
            vec!["gunicorn", "-b", "0.0.0.0:8000", "app:create_app()"]
        );

        let cache = file.services["cache"].request("shop", "cache", Some("shop_default")).unwrap();
        assert_eq!(cache.options()["port.6379"], OptionValue::Int(6379));
    }

    #[test]
    fn test_unsupported_service_keys() {
        let file = ComposeFile::from_yaml_str(
            "services:\n  web:\n    build: .\n  named:\n    image: nginx\n    container_name: edge\n  odd:\n    image: nginx\n    extra_hosts: ['h:1.2.3.4']\n  bound:\n    image: nginx\n    ports: ['127.0.0.1:8080:80']\n",
        )
        .unwrap();
        for service in ["web", "named", "odd", "bound"] {
            let err = file.services[service].request("shop", service, None).unwrap_err();
            assert_eq!(err.kind, PolicyViolationKind::ParameterOutOfRange, "{}", service);
        }
    }

    #[test]
    fn test_guarded_keys_are_forwarded() {
        let file = ComposeFile::from_yaml_str(
            "services:\n  box:\n    image: alpine\n    pid: host\n    privileged: true\n",
        )
        .unwrap();
        let request = file.services["box"].request("shop", "box", None).unwrap();
        assert_eq!(request.options()["pid_mode"], OptionValue::Text("host".to_string()));
        assert_eq!(request.options()["privileged"], OptionValue::Bool(true));
    }
}
