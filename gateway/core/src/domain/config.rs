// Copyright (c) 2026 Gatehouse Contributors
// SPDX-License-Identifier: AGPL-3.0

// Gateway Configuration Types
//
// Defines the configuration schema for a Gatehouse gateway, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Daemon endpoint, call budget and retry settings
// - Validation policy allow-lists and numeric ceilings
// - The known-project registry used by the build orchestrator
// - Logging settings consumed by the CLI

use crate::domain::project::{ProjectDescriptor, ProjectRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "gatehouse.dev/v1";
pub const KIND: &str = "GatewayConfig";

/// Top-level Kubernetes-style gateway configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigManifest {
    /// API version (must be "gatehouse.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "GatewayConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: GatewayConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable gateway name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Gateway settings (content under `spec:`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfigSpec {
    #[serde(default)]
    pub daemon: DaemonSettings,

    #[serde(default)]
    pub policy: PolicySettings,

    /// Known build projects
    #[serde(default)]
    pub projects: Vec<ProjectDescriptor>,

    #[serde(default)]
    pub builds: BuildSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// `unix:///var/run/docker.sock`, a bare socket path, or `tcp://host:port`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Budget for a single bounded daemon call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient transport faults
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Longest wait for the next item of a pull, build or push stream
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,

    /// Items buffered between a daemon stream reader and its consumer
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl DaemonSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    /// Local socket path, when the endpoint is a unix socket.
    pub fn socket_path(&self) -> Option<PathBuf> {
        let endpoint = self.endpoint.trim();
        if let Some(path) = endpoint.strip_prefix("unix://") {
            // `unix://var/run/docker.sock` is a common misspelling of the
            // absolute form.
            let path = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{}", path)
            };
            return Some(PathBuf::from(path));
        }
        if endpoint.starts_with('/') {
            return Some(PathBuf::from(endpoint));
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Host path prefixes under which bind-mount sources are permitted.
    /// Empty means every host mount is rejected.
    #[serde(default)]
    pub allowed_mount_roots: Vec<PathBuf>,

    /// Capabilities callers may add. Empty by default.
    #[serde(default)]
    pub allowed_capabilities: Vec<String>,

    /// Substrings an image reference must contain one of (empty = any)
    #[serde(default)]
    pub allowed_images: Vec<String>,

    /// Substrings that block an image reference
    #[serde(default)]
    pub blocked_images: Vec<String>,

    #[serde(default = "default_max_log_tail")]
    pub max_log_tail: u32,

    #[serde(default = "default_max_cpus")]
    pub max_cpus: f64,

    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,

    #[serde(default = "default_stop_timeout")]
    pub default_stop_timeout: u32,

    #[serde(default = "default_max_stop_timeout")]
    pub max_stop_timeout: u32,

    #[serde(default = "default_max_identifier_len")]
    pub max_identifier_len: usize,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            allowed_mount_roots: vec![],
            allowed_capabilities: vec![],
            allowed_images: vec![],
            blocked_images: vec![],
            max_log_tail: default_max_log_tail(),
            max_cpus: default_max_cpus(),
            max_memory_bytes: default_max_memory_bytes(),
            default_stop_timeout: default_stop_timeout(),
            max_stop_timeout: default_max_stop_timeout(),
            max_identifier_len: default_max_identifier_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Finished build runs kept for status queries
    #[serde(default = "default_build_history")]
    pub history: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            history: default_build_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_endpoint() -> String {
    "unix:///var/run/docker.sock".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_stream_idle_timeout_secs() -> u64 {
    300
}

fn default_stream_buffer() -> usize {
    64
}

fn default_max_log_tail() -> u32 {
    1000
}

fn default_max_cpus() -> f64 {
    2.0
}

fn default_max_memory_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_stop_timeout() -> u32 {
    10
}

fn default_max_stop_timeout() -> u32 {
    120
}

fn default_max_identifier_len() -> usize {
    253
}

fn default_build_history() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for GatewayConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "gatehouse".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: GatewayConfigSpec::default(),
        }
    }
}

/// Parse `512m`, `1g`, `1.5G`, `2048k`, `1gb` or a plain byte count.
pub fn parse_memory_size(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();
    let value = value.strip_suffix('b').unwrap_or(value.as_str());
    if value.is_empty() {
        return None;
    }
    let (number, multiplier) = match value.chars().last()? {
        'k' => (&value[..value.len() - 1], 1024u64),
        'm' => (&value[..value.len() - 1], 1024 * 1024),
        'g' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        't' => (&value[..value.len() - 1], 1024 * 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    let number: f64 = number.trim().parse().ok()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some((number * multiplier as f64) as u64)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl GatewayConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. GATEHOUSE_CONFIG_PATH environment variable
    /// 2. ./gatehouse-config.yaml (working directory)
    /// 3. ~/.gatehouse/config.yaml (user home)
    /// 4. /etc/gatehouse/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("GATEHOUSE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!("GATEHOUSE_CONFIG_PATH points at a missing file: {:?}", path);
        }

        let cwd = PathBuf::from("./gatehouse-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".gatehouse").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/gatehouse/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must load
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(&config_path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", config_path, e))?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as [`Self::apply_env_overrides`] with an injectable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let daemon = &mut self.spec.daemon;
        let policy = &mut self.spec.policy;

        if let Some(val) = lookup("DOCKER_SOCKET").or_else(|| lookup("DOCKER_HOST")) {
            if !val.trim().is_empty() {
                tracing::info!("Environment override: daemon endpoint={}", val);
                daemon.endpoint = val.trim().to_string();
            }
        }

        if let Some(val) = lookup("DOCKER_TIMEOUT") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    tracing::info!("Environment override: DOCKER_TIMEOUT={}", secs);
                    daemon.timeout_secs = secs;
                }
                _ => tracing::warn!(
                    "Invalid value for DOCKER_TIMEOUT: '{}'. Expected positive seconds. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("GATEHOUSE_MAX_RETRIES") {
            match val.trim().parse::<u32>() {
                Ok(retries) => {
                    tracing::info!("Environment override: GATEHOUSE_MAX_RETRIES={}", retries);
                    daemon.max_retries = retries;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for GATEHOUSE_MAX_RETRIES: '{}'. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("ALLOWED_VOLUME_PATHS") {
            let roots: Vec<PathBuf> = split_list(&val).into_iter().map(PathBuf::from).collect();
            tracing::info!("Environment override: ALLOWED_VOLUME_PATHS ({} roots)", roots.len());
            policy.allowed_mount_roots = roots;
        }

        if let Some(val) = lookup("ALLOWED_IMAGES") {
            policy.allowed_images = split_list(&val);
        }

        if let Some(val) = lookup("BLOCKED_IMAGES") {
            policy.blocked_images = split_list(&val);
        }

        if let Some(val) = lookup("MAX_CPUS") {
            match val.trim().parse::<f64>() {
                Ok(cpus) if cpus.is_finite() && cpus > 0.0 => {
                    tracing::info!("Environment override: MAX_CPUS={}", cpus);
                    policy.max_cpus = cpus;
                }
                _ => tracing::warn!("Invalid value for MAX_CPUS: '{}'. Ignoring.", val),
            }
        }

        if let Some(val) = lookup("MAX_MEMORY") {
            match parse_memory_size(&val) {
                Some(bytes) if bytes > 0 => {
                    tracing::info!("Environment override: MAX_MEMORY={} bytes", bytes);
                    policy.max_memory_bytes = bytes;
                }
                _ => tracing::warn!(
                    "Invalid value for MAX_MEMORY: '{}'. Expected e.g. 512m or 1g. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("GATEHOUSE_MAX_LOG_TAIL") {
            match val.trim().parse::<u32>() {
                Ok(tail) if tail > 0 => policy.max_log_tail = tail,
                _ => tracing::warn!(
                    "Invalid value for GATEHOUSE_MAX_LOG_TAIL: '{}'. Ignoring.",
                    val
                ),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let daemon = &self.spec.daemon;
        if daemon.endpoint.trim().is_empty() {
            anyhow::bail!("spec.daemon.endpoint cannot be empty");
        }
        if daemon.timeout_secs == 0 {
            anyhow::bail!("spec.daemon.timeout_secs must be greater than zero");
        }
        if daemon.stream_idle_timeout_secs == 0 {
            anyhow::bail!("spec.daemon.stream_idle_timeout_secs must be greater than zero");
        }
        if daemon.stream_buffer == 0 {
            anyhow::bail!("spec.daemon.stream_buffer must be greater than zero");
        }

        let policy = &self.spec.policy;
        for root in &policy.allowed_mount_roots {
            if !root.is_absolute() {
                anyhow::bail!("Mount allow-root must be absolute: {:?}", root);
            }
        }
        if !policy.max_cpus.is_finite() || policy.max_cpus <= 0.0 {
            anyhow::bail!("spec.policy.max_cpus must be a positive number");
        }
        if policy.max_log_tail == 0 {
            anyhow::bail!("spec.policy.max_log_tail must be greater than zero");
        }

        let mut seen = HashSet::new();
        for project in &self.spec.projects {
            if project.name.is_empty() {
                anyhow::bail!("Project name cannot be empty");
            }
            if !seen.insert(project.name.as_str()) {
                anyhow::bail!("Duplicate project name: {}", project.name);
            }
            if !project.context.is_absolute() {
                anyhow::bail!(
                    "Build context for project '{}' must be absolute: {:?}",
                    project.name,
                    project.context
                );
            }
        }

        if self.spec.builds.history == 0 {
            anyhow::bail!("spec.builds.history must be greater than zero");
        }

        Ok(())
    }

    pub fn project_registry(&self) -> ProjectRegistry {
        ProjectRegistry::new(self.spec.projects.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = GatewayConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(!manifest.metadata.name.is_empty());
        assert!(manifest.spec.policy.allowed_mount_roots.is_empty());
        assert!(manifest.spec.policy.allowed_capabilities.is_empty());
        assert_eq!(manifest.spec.daemon.max_retries, 2);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let yaml = r#"
apiVersion: gatehouse.dev/v1
kind: GatewayConfig
metadata:
  name: build-box
spec:
  daemon:
    endpoint: tcp://127.0.0.1:2375
    timeout_secs: 5
  policy:
    allowed_mount_roots: ["/srv/data"]
  projects:
    - name: ocr
      context: /projects/ocr
      deploy:
        ports:
          8080: 18080
"#;
        let manifest = GatewayConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "build-box");
        assert_eq!(manifest.spec.daemon.timeout_secs, 5);
        assert_eq!(manifest.spec.daemon.retry_backoff_ms, 200);
        assert_eq!(manifest.spec.policy.max_log_tail, 1000);
        assert_eq!(manifest.spec.daemon.socket_path(), None);

        let registry = manifest.project_registry();
        let ocr = registry.get("ocr").unwrap();
        assert_eq!(ocr.dockerfile, "Dockerfile");
        assert_eq!(ocr.deploy.ports.get(&8080), Some(&18080));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut manifest = GatewayConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.policy.allowed_mount_roots = vec![PathBuf::from("relative/dir")];
        assert!(manifest.validate().is_err());
        manifest.spec.policy.allowed_mount_roots.clear();

        manifest.spec.projects = vec![
            ProjectDescriptor::new("ocr", "/projects/ocr"),
            ProjectDescriptor::new("ocr", "/projects/other"),
        ];
        assert!(manifest.validate().is_err());

        manifest.spec.projects = vec![ProjectDescriptor::new("ocr", "projects/ocr")];
        assert!(manifest.validate().is_err());

        manifest.spec.projects.clear();
        manifest.spec.daemon.timeout_secs = 0;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DOCKER_SOCKET", "unix://var/run/docker.sock"),
            ("DOCKER_TIMEOUT", "12"),
            ("ALLOWED_VOLUME_PATHS", "/tmp, /srv/data,"),
            ("MAX_MEMORY", "512m"),
            ("MAX_CPUS", "not-a-number"),
            ("BLOCKED_IMAGES", "miner,evil"),
        ]);
        let mut manifest = GatewayConfigManifest::default();
        manifest.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        let daemon = &manifest.spec.daemon;
        assert_eq!(daemon.timeout_secs, 12);
        assert_eq!(daemon.socket_path(), Some(PathBuf::from("/var/run/docker.sock")));

        let policy = &manifest.spec.policy;
        assert_eq!(
            policy.allowed_mount_roots,
            vec![PathBuf::from("/tmp"), PathBuf::from("/srv/data")]
        );
        assert_eq!(policy.max_memory_bytes, 512 * 1024 * 1024);
        // Invalid values leave the default in place
        assert_eq!(policy.max_cpus, 2.0);
        assert_eq!(policy.blocked_images, vec!["miner".to_string(), "evil".to_string()]);
    }

    #[test]
    fn test_parse_memory_size() {
        assert_eq!(parse_memory_size("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_size("512MB"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_size("1.5k"), Some(1536));
        assert_eq!(parse_memory_size("4096"), Some(4096));
        assert_eq!(parse_memory_size("lots"), None);
        assert_eq!(parse_memory_size("-1m"), None);
        assert_eq!(parse_memory_size(""), None);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatehouse-config.yaml");
        let mut manifest = GatewayConfigManifest::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.projects.push(ProjectDescriptor::new("wraith", "/projects/wraith"));
        manifest.to_yaml_file(&path).unwrap();

        let loaded = GatewayConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec.projects.len(), 1);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let result = GatewayConfigManifest::load_or_default(Some(PathBuf::from(
            "/nonexistent/gatehouse-config.yaml",
        )));
        assert!(result.is_err());
    }
}
