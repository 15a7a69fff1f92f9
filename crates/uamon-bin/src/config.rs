// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading for uamon.
//!
//! The configuration names the server endpoint and the nodes to monitor.
//! Everything else has defaults matching the fixed telemetry parameters.
//!
//! ```yaml
//! endpoint: opc.tcp://localhost:4840
//! nodes:
//!   - ns=1;s=Temperature
//!   - ns=1;s=Pressure
//! silent: true
//! request_timeout: 30s
//! subscription:
//!   publishing_interval: 1s
//! monitoring:
//!   sampling_interval: 100ms
//!   queue_size: 10
//! ```
//!
//! # Loading Pipeline
//!
//! 1. Select the format from the file extension (YAML or TOML)
//! 2. Parse into [`UamonConfig`]
//! 3. Apply environment overrides (`UAMON_ENDPOINT`, `UAMON_NODES`)
//! 4. Validate

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use uamon_opcua::{ControllerSettings, MonitoredItemSettings, NodeId, SubscriptionSettings};

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "UAMON";

// =============================================================================
// ConfigError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found.
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// File I/O error.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Unsupported file extension.
    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat {
        /// The offending extension.
        extension: String,
    },

    /// Failed to parse the configuration.
    #[error("Failed to parse config: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },

    /// A field holds an invalid value.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// An environment override holds an invalid value.
    #[error("Invalid environment variable value for '{name}': {message}")]
    InvalidEnvVar {
        /// The environment variable name.
        name: String,
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// UamonConfig
// =============================================================================

/// Complete uamon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UamonConfig {
    /// Server endpoint URL.
    #[serde(default)]
    pub endpoint: String,

    /// Node identifiers to monitor, in order.
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Suppress per-change diagnostics.
    #[serde(default = "default_silent")]
    pub silent: bool,

    /// Upper bound for each setup call.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Subscription parameters.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Monitored item parameters.
    #[serde(default)]
    pub monitoring: MonitoredItemSettings,
}

fn default_silent() -> bool {
    true
}

fn default_request_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

impl Default for UamonConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            nodes: Vec::new(),
            silent: default_silent(),
            request_timeout: default_request_timeout(),
            subscription: SubscriptionSettings::default(),
            monitoring: MonitoredItemSettings::default(),
        }
    }
}

impl UamonConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::validation("endpoint", "must not be empty"));
        }
        if !endpoint.starts_with("opc.tcp://") {
            return Err(ConfigError::validation(
                "endpoint",
                format!("'{}' must use the opc.tcp:// scheme", endpoint),
            ));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            node.parse::<NodeId>()
                .map_err(|e| ConfigError::validation(format!("nodes[{}]", i), e.to_string()))?;
        }

        self.subscription
            .validate()
            .map_err(|e| ConfigError::validation("subscription", e.to_string()))?;
        self.monitoring
            .validate()
            .map_err(|e| ConfigError::validation("monitoring", e.to_string()))?;

        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::validation(
                "request_timeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Returns warnings that do not prevent startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.nodes.is_empty() {
            warnings.push("No nodes configured".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.as_str()) {
                warnings.push(format!("Node '{}' is configured more than once", node));
            }
        }
        if self.request_timeout.is_none() {
            warnings.push("No request timeout; setup calls may wait forever".to_string());
        }
        warnings
    }

    /// Returns the controller settings this configuration describes.
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            subscription: self.subscription.clone(),
            monitoring: self.monitoring.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            Some(other) => Err(ConfigError::UnsupportedFormat {
                extension: other.to_string(),
            }),
            None => Err(ConfigError::UnsupportedFormat {
                extension: "(no extension)".to_string(),
            }),
        }
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`UamonConfig`] from files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    apply_env: bool,
}

impl ConfigLoader {
    /// Creates a loader that applies `UAMON_*` overrides.
    pub fn new() -> Self {
        Self {
            env_prefix: ENV_PREFIX.to_string(),
            apply_env: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.apply_env = enabled;
        self
    }

    /// Loads, overrides and validates a configuration file.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<UamonConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = self.load_from_str(&content, ConfigFormat::from_path(path)?)?;
        debug!(
            endpoint = %config.endpoint,
            nodes = config.nodes.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parses, overrides and validates configuration content.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<UamonConfig> {
        let mut config = parse_str(content, format)?;
        if self.apply_env {
            self.apply_overrides(&mut config, |name| env::var(name).ok())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&self, config: &mut UamonConfig, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint_var = format!("{}_ENDPOINT", self.env_prefix);
        if let Some(value) = lookup(&endpoint_var) {
            debug!(variable = %endpoint_var, "Endpoint overridden from environment");
            config.endpoint = value;
        }

        let nodes_var = format!("{}_NODES", self.env_prefix);
        if let Some(value) = lookup(&nodes_var) {
            let nodes: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if nodes.is_empty() {
                return Err(ConfigError::InvalidEnvVar {
                    name: nodes_var,
                    message: "expected a comma separated list of node ids".to_string(),
                });
            }
            debug!(variable = %nodes_var, count = nodes.len(), "Nodes overridden from environment");
            config.nodes = nodes;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_str(content: &str, format: ConfigFormat) -> ConfigResult<UamonConfig> {
    match format {
        ConfigFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ConfigError::parse(e.to_string()))
        }
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| ConfigError::parse(e.to_string())),
    }
}

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<UamonConfig> {
    ConfigLoader::new().load(path)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
endpoint: opc.tcp://localhost:4840
nodes:
  - ns=1;s=Var1
  - ns=2;i=2258
request_timeout: 5s
subscription:
  publishing_interval: 500ms
monitoring:
  queue_size: 20
"#;

    fn loader() -> ConfigLoader {
        ConfigLoader::new().with_env_vars(false)
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let config = loader().load_from_str(YAML, ConfigFormat::Yaml).unwrap();

        assert_eq!(config.endpoint, "opc.tcp://localhost:4840");
        assert_eq!(config.nodes, vec!["ns=1;s=Var1", "ns=2;i=2258"]);
        assert!(config.silent);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.subscription.publishing_interval, Duration::from_millis(500));
        assert_eq!(config.subscription.keepalive_count, 20);
        assert_eq!(config.monitoring.queue_size, 20);
        assert_eq!(config.monitoring.sampling_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "endpoint = \"opc.tcp://plc:4840\"\nnodes = [\"ns=1;s=Var1\"]\nsilent = false"
        )
        .unwrap();

        let config = loader().load(file.path()).unwrap();

        assert_eq!(config.endpoint, "opc.tcp://plc:4840");
        assert!(!config.silent);
        assert_eq!(config.controller_settings().request_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.YML")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert!(matches!(
            ConfigFormat::from_path(Path::new("a.ini")),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
        assert!(ConfigFormat::from_path(Path::new("config")).is_err());
    }

    #[test]
    fn test_file_not_found() {
        let result = loader().load("/nonexistent/path/uamon.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_validation() {
        let missing = "nodes: [\"ns=1;s=Var1\"]";
        assert!(matches!(
            loader().load_from_str(missing, ConfigFormat::Yaml),
            Err(ConfigError::Validation { ref field, .. }) if field == "endpoint"
        ));

        let scheme = "endpoint: http://localhost:4840";
        assert!(loader().load_from_str(scheme, ConfigFormat::Yaml).is_err());

        let node = "endpoint: opc.tcp://localhost:4840\nnodes: [\"ns=1;x=1\"]";
        assert!(matches!(
            loader().load_from_str(node, ConfigFormat::Yaml),
            Err(ConfigError::Validation { ref field, .. }) if field == "nodes[0]"
        ));

        let queue = "endpoint: opc.tcp://localhost:4840\nmonitoring: { queue_size: 0 }";
        assert!(loader().load_from_str(queue, ConfigFormat::Yaml).is_err());
    }

    #[test]
    fn test_parse_error() {
        let result = loader().load_from_str("endpoint: [", ConfigFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("UAMON_ENDPOINT", "opc.tcp://override:4840"),
            ("UAMON_NODES", "ns=1;s=A, ns=1;s=B,"),
        ]
        .into_iter()
        .collect();
        let mut config = UamonConfig::default();

        loader()
            .apply_overrides(&mut config, |name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.endpoint, "opc.tcp://override:4840");
        assert_eq!(config.nodes, vec!["ns=1;s=A", "ns=1;s=B"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_nodes_override_is_rejected() {
        let mut config = UamonConfig::default();
        let result = loader().apply_overrides(&mut config, |name| {
            (name == "UAMON_NODES").then(|| " , ".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_warnings() {
        let config = UamonConfig {
            endpoint: "opc.tcp://localhost:4840".into(),
            nodes: vec!["ns=1;s=A".into(), "ns=1;s=A".into()],
            request_timeout: None,
            ..Default::default()
        };
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(UamonConfig::default().warnings()[0].contains("No nodes"));
    }
}
