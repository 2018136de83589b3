// Configuration File Support
//
// This module provides configuration file parsing for the cligate server.
// Supports YAML format with environment variable overrides.
// The file is looked up from --config, then CLIGATE_CONFIG, then ./config.yaml

use crate::backends::{openshift, openstack};
use crate::gateway::executor::MAX_CAPACITY;
use crate::gateway::timeout::DEFAULT_TIMEOUT_SECS;
use crate::gateway::MatchStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding the config file path
pub const CONFIG_ENV: &str = "CLIGATE_CONFIG";

/// Config file used when neither `--config` nor `CLIGATE_CONFIG` is set
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener and execution pool
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Caller authentication
    pub security: SecurityConfig,

    /// Host and Origin checks on the MCP endpoint
    pub transport: TransportConfig,

    /// `openstack-cli` tool
    pub openstack: OpenStackConfig,

    /// `openshift-cli` tool
    pub openshift: OpenShiftConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// HTTP listener and execution pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind to
    pub ip: String,

    /// Port to bind to
    pub port: u16,

    /// Number of commands that may execute at the same time
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: 8080,
            workers: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Caller authentication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Static bearer token required on every MCP request (disabled when unset)
    pub token: Option<String>,
}

/// DNS rebinding protection for the MCP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Reject requests whose `Host` or `Origin` is not allow-listed
    pub dns_rebinding_protection: bool,

    /// `Host` patterns, e.g. `localhost:*`
    pub allowed_hosts: Vec<String>,

    /// `Origin` patterns, e.g. `http://localhost:*`
    pub allowed_origins: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dns_rebinding_protection: false,
            allowed_hosts: vec!["*:*".to_string()],
            allowed_origins: vec!["http://*:*".to_string()],
        }
    }
}

/// OpenStack backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenStackConfig {
    /// Expose the `openstack-cli` tool
    pub enabled: bool,

    /// Executable to run
    pub program: String,

    /// Allow write operations
    pub allow_write: bool,

    /// CA certificate bundle passed as `--os-cacert`
    pub ca_cert: Option<String>,

    /// Skip TLS verification (`--insecure`)
    pub insecure: bool,

    /// Per-command deadline, `0` disables it
    pub timeout_secs: u64,

    /// Discover the latest API version of every service on first use
    pub negotiate_versions: bool,

    /// How command words are matched against the lists
    pub match_strategy: MatchStrategy,

    /// Commands allowed in read-only mode
    pub allowed_commands: Vec<String>,

    /// Commands always denied; defaults depend on `allow_write` when unset
    pub blocked_commands: Option<Vec<String>>,

    /// Directories searched for `clouds.yaml` and `secure.yaml`
    pub credential_dirs: Vec<String>,
}

impl Default for OpenStackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: openstack::PROGRAM.to_string(),
            allow_write: false,
            ca_cert: None,
            insecure: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            negotiate_versions: true,
            match_strategy: MatchStrategy::Verb,
            allowed_commands: to_strings(openstack::DEFAULT_ALLOWED_COMMANDS),
            blocked_commands: None,
            credential_dirs: to_strings(openstack::DEFAULT_CREDENTIAL_DIRS),
        }
    }
}

impl OpenStackConfig {
    /// The deny-list in effect
    ///
    /// Unless configured, read-only mode keeps the write verbs as a guard and
    /// write mode blocks nothing.
    pub fn effective_blocked_commands(&self) -> Vec<String> {
        match &self.blocked_commands {
            Some(blocked) => blocked.clone(),
            None if self.allow_write => Vec::new(),
            None => to_strings(openstack::DEFAULT_BLOCKED_COMMANDS),
        }
    }
}

/// OpenShift backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenShiftConfig {
    /// Expose the `openshift-cli` tool
    pub enabled: bool,

    /// Executable to run
    pub program: String,

    /// Allow write operations
    pub allow_write: bool,

    /// Skip TLS verification (`--insecure-skip-tls-verify=true`)
    pub insecure: bool,

    /// Per-command deadline, `0` disables it
    pub timeout_secs: u64,

    /// How command words are matched against the lists
    pub match_strategy: MatchStrategy,

    /// Commands allowed in read-only mode
    pub allowed_commands: Vec<String>,

    /// Commands denied even when writing is allowed
    pub blocked_commands: Vec<String>,

    /// Directories searched for a kubeconfig named `config`
    pub credential_dirs: Vec<String>,
}

impl Default for OpenShiftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: openshift::PROGRAM.to_string(),
            allow_write: false,
            insecure: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            match_strategy: MatchStrategy::Prefix,
            allowed_commands: to_strings(openshift::DEFAULT_ALLOWED_COMMANDS),
            blocked_commands: to_strings(openshift::DEFAULT_BLOCKED_COMMANDS),
            credential_dirs: to_strings(openshift::DEFAULT_CREDENTIAL_DIRS),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve `GET /metrics` next to the MCP endpoint
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn to_strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Config {
    /// Load configuration from `--config`, `CLIGATE_CONFIG` or `config.yaml`
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = Self::config_path(explicit);
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// If the file does not exist, defaults (plus environment overrides) are
    /// used.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        // Apply environment variable overrides
        let config = config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Resolve the configuration file path
    pub fn config_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - CLIGATE_LOG_LEVEL
    /// - CLIGATE_LOG_FORMAT
    /// - CLIGATE_IP
    /// - CLIGATE_PORT
    /// - CLIGATE_WORKERS
    /// - CLIGATE_OPENSTACK_ALLOW_WRITE
    /// - CLIGATE_OPENSHIFT_ALLOW_WRITE
    /// - CLIGATE_METRICS_ENABLED
    /// - CLIGATE_TOKEN
    fn apply_env_overrides(mut self) -> Self {
        // Logging overrides
        if let Ok(level) = std::env::var("CLIGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CLIGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Server overrides
        if let Ok(ip) = std::env::var("CLIGATE_IP") {
            self.server.ip = ip;
        }
        if let Ok(port) = std::env::var("CLIGATE_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(workers) = std::env::var("CLIGATE_WORKERS") {
            if let Ok(workers) = workers.parse::<usize>() {
                if workers > 0 && workers <= MAX_CAPACITY {
                    self.server.workers = workers;
                }
            }
        }

        // Backend overrides
        if let Ok(allow) = std::env::var("CLIGATE_OPENSTACK_ALLOW_WRITE") {
            self.openstack.allow_write = allow.parse().unwrap_or(self.openstack.allow_write);
        }
        if let Ok(allow) = std::env::var("CLIGATE_OPENSHIFT_ALLOW_WRITE") {
            self.openshift.allow_write = allow.parse().unwrap_or(self.openshift.allow_write);
        }

        // Metrics overrides
        if let Ok(enabled) = std::env::var("CLIGATE_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        if let Ok(token) = std::env::var("CLIGATE_TOKEN") {
            if !token.is_empty() {
                self.security.token = Some(token);
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate server configuration
        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }
        if self.server.workers == 0 || self.server.workers > MAX_CAPACITY {
            anyhow::bail!("Workers must be between 1 and {}", MAX_CAPACITY);
        }
        if matches!(&self.security.token, Some(token) if token.is_empty()) {
            anyhow::bail!("Security token must not be empty when set");
        }
        if self.transport.dns_rebinding_protection && self.transport.allowed_hosts.is_empty() {
            anyhow::bail!("DNS rebinding protection requires at least one allowed host");
        }

        // Validate backend configurations
        if self.openstack.enabled {
            if self.openstack.program.is_empty() {
                anyhow::bail!("OpenStack program must not be empty");
            }
            openstack::policy_engine(&self.openstack).context("Invalid OpenStack policy")?;
        }
        if self.openshift.enabled {
            if self.openshift.program.is_empty() {
                anyhow::bail!("OpenShift program must not be empty");
            }
            openshift::policy_engine(&self.openshift).context("Invalid OpenShift policy")?;
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging.level.to_lowercase().parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const ENV_VARS: &[&str] = &[
        "CLIGATE_LOG_LEVEL",
        "CLIGATE_LOG_FORMAT",
        "CLIGATE_IP",
        "CLIGATE_PORT",
        "CLIGATE_WORKERS",
        "CLIGATE_OPENSTACK_ALLOW_WRITE",
        "CLIGATE_OPENSHIFT_ALLOW_WRITE",
        "CLIGATE_METRICS_ENABLED",
        "CLIGATE_TOKEN",
    ];

    // Environment is process-wide, so tests touching it run one at a time
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server.ip, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.workers, 10);
        assert!(!config.openstack.allow_write);
        assert!(!config.openshift.allow_write);
        assert_eq!(config.openstack.match_strategy, MatchStrategy::Verb);
        assert_eq!(config.openshift.match_strategy, MatchStrategy::Prefix);
        assert_eq!(config.openstack.timeout_secs, 300);
        assert!(config.security.token.is_none());
        assert!(!config.transport.dns_rebinding_protection);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_validation_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_workers() {
        let mut config = Config::default();
        config.server.workers = 0;
        assert!(config.validate().is_err());

        config.server.workers = MAX_CAPACITY + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_transport() {
        let mut config = Config::default();
        config.transport.allowed_hosts.clear();
        assert!(config.validate().is_ok());

        config.transport.dns_rebinding_protection = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_policy_overlap() {
        let mut config = Config::default();
        config.openshift.blocked_commands.push("get".to_string());
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("both allowed and blocked"));
    }

    #[test]
    fn test_config_validation_empty_allow_list() {
        let mut config = Config::default();
        config.openshift.allowed_commands.clear();
        assert!(config.validate().is_err());

        // Irrelevant once writing is allowed
        config.openshift.allow_write = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled_backend_is_not_validated() {
        let mut config = Config::default();
        config.openstack.allowed_commands.clear();
        config.openstack.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_openstack_blocked_defaults_follow_mode() {
        let mut config = OpenStackConfig::default();
        assert!(config
            .effective_blocked_commands()
            .contains(&"delete".to_string()));

        config.allow_write = true;
        assert!(config.effective_blocked_commands().is_empty());

        config.blocked_commands = Some(vec!["delete".to_string()]);
        assert_eq!(config.effective_blocked_commands(), ["delete"]);
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        let config = Config::load_from_path(&path);
        assert!(config.is_ok());
        assert_eq!(config.unwrap(), Config::default());
    }

    #[test]
    fn test_load_valid_yaml_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let temp_file = NamedTempFile::new().unwrap();
        let yaml_content = r#"
server:
  ip: 127.0.0.1
  port: 9000
  workers: 4
logging:
  level: debug
  format: json
security:
  token: s3cr3t
transport:
  dns_rebinding_protection: true
  allowed_hosts: ["localhost:*"]
openstack:
  allow_write: true
  ca_cert: /etc/pki/ca.pem
  blocked_commands: ["delete"]
openshift:
  insecure: true
  allowed_commands: ["get", "logs"]
metrics:
  enabled: false
"#;

        fs::write(temp_file.path(), yaml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.server.ip, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.workers, 4);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.security.token.as_deref(), Some("s3cr3t"));
        assert!(config.transport.dns_rebinding_protection);
        assert_eq!(config.transport.allowed_hosts, ["localhost:*"]);
        assert_eq!(config.transport.allowed_origins, ["http://*:*"]);
        assert!(config.openstack.allow_write);
        assert_eq!(config.openstack.ca_cert.as_deref(), Some("/etc/pki/ca.pem"));
        assert_eq!(config.openstack.effective_blocked_commands(), ["delete"]);
        assert!(config.openshift.insecure);
        assert_eq!(config.openshift.allowed_commands, ["get", "logs"]);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_load_invalid_yaml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let yaml_content = "server: [unclosed";

        fs::write(temp_file.path(), yaml_content).unwrap();

        let config = Config::load_from_path(temp_file.path());
        assert!(config.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        std::env::set_var("CLIGATE_LOG_LEVEL", "debug");
        std::env::set_var("CLIGATE_LOG_FORMAT", "json");
        std::env::set_var("CLIGATE_IP", "127.0.0.1");
        std::env::set_var("CLIGATE_PORT", "9999");
        std::env::set_var("CLIGATE_WORKERS", "32");
        std::env::set_var("CLIGATE_OPENSHIFT_ALLOW_WRITE", "true");
        std::env::set_var("CLIGATE_METRICS_ENABLED", "false");
        std::env::set_var("CLIGATE_TOKEN", "tok");

        let config = Config::default().apply_env_overrides();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.server.ip, "127.0.0.1");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.workers, 32);
        assert!(config.openshift.allow_write);
        assert!(!config.openstack.allow_write);
        assert!(!config.metrics.enabled);
        assert_eq!(config.security.token.as_deref(), Some("tok"));

        clear_env();
    }

    #[test]
    fn test_env_overrides_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        std::env::set_var("CLIGATE_WORKERS", "0"); // Invalid (must be > 0)
        std::env::set_var("CLIGATE_PORT", "not-a-port");
        std::env::set_var("CLIGATE_OPENSTACK_ALLOW_WRITE", "maybe");

        let config = Config::default().apply_env_overrides();

        // Should keep defaults for invalid values
        assert_eq!(config.server.workers, 10);
        assert_eq!(config.server.port, 8080);
        assert!(!config.openstack.allow_write);

        clear_env();
    }

    #[test]
    fn test_config_path_precedence() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(CONFIG_ENV);
        assert_eq!(Config::config_path(None), PathBuf::from("config.yaml"));

        std::env::set_var(CONFIG_ENV, "/etc/cligate/config.yaml");
        assert_eq!(
            Config::config_path(None),
            PathBuf::from("/etc/cligate/config.yaml")
        );
        assert_eq!(
            Config::config_path(Some(Path::new("local.yaml"))),
            PathBuf::from("local.yaml")
        );
        std::env::remove_var(CONFIG_ENV);
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);

        config.logging.level = "info".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::INFO);
    }

    #[test]
    fn test_log_level_parsing_invalid() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.log_level().is_err());
    }

    #[test]
    fn test_config_partial_yaml() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "logging:\n  level: debug\n").unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        // Other fields should have defaults
        assert_eq!(config.server.workers, 10);
        assert_eq!(config.openshift, OpenShiftConfig::default());
    }

    #[test]
    fn test_valid_log_levels() {
        let levels = vec!["trace", "debug", "info", "warn", "error"];
        for level in levels {
            let mut config = Config::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Log level {} should be valid", level);
        }
    }
}
