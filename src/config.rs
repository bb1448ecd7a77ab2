//! replinit Configuration
//!
//! This module provides configuration structures for the replica set
//! bootstrapper. Every section is optional; an empty file reproduces
//! the stock single-node `docker-replicaset` setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::topology::{validate_host, ReplicaSetConfig};

/// Main replinit configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Target node connection configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Replica set topology to initiate
    #[serde(default)]
    pub replica_set: ReplicaSetConfig,

    /// Bootstrap behaviour
    #[serde(default)]
    pub bootstrap: BootstrapSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target node connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node address (host:port)
    #[serde(default = "default_address")]
    pub address: String,

    /// Full connection string; overrides `address` when set
    #[serde(default)]
    pub uri: Option<String>,

    /// Connect directly to the node instead of discovering the set
    #[serde(default = "default_true")]
    pub direct_connection: bool,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Server selection timeout in seconds
    #[serde(default = "default_server_selection_timeout")]
    pub server_selection_timeout_secs: u64,

    /// Application name reported to the server
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// How the pre-initiate check treats errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckPolicy {
    /// Only "not initiated" triggers initiation; connectivity errors are
    /// retried and everything else is surfaced
    #[default]
    Strict,
    /// Any error during the check triggers initiation
    Lenient,
}

impl std::fmt::Display for CheckPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckPolicy::Strict => write!(f, "strict"),
            CheckPolicy::Lenient => write!(f, "lenient"),
        }
    }
}

/// Bootstrap behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSection {
    /// Error policy for the configuration check
    #[serde(default)]
    pub check_policy: CheckPolicy,

    /// Attempts for the configuration check (strict policy only)
    #[serde(default = "default_check_attempts")]
    pub check_attempts: u32,

    /// Initial backoff between check attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound for the backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Wait for the node to become primary after initiating
    #[serde(default = "default_true")]
    pub wait_for_primary: bool,

    /// How long to wait for primary in seconds
    #[serde(default = "default_primary_timeout")]
    pub primary_timeout_secs: u64,

    /// Poll interval while waiting for primary in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_address() -> String {
    "mongo_db_node_01:27017".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_server_selection_timeout() -> u64 {
    30
}

fn default_app_name() -> String {
    "replinit".to_string()
}

fn default_check_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_primary_timeout() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            uri: None,
            direct_connection: true,
            connect_timeout_secs: default_connect_timeout(),
            server_selection_timeout_secs: default_server_selection_timeout(),
            app_name: default_app_name(),
        }
    }
}

impl Default for BootstrapSection {
    fn default() -> Self {
        Self {
            check_policy: CheckPolicy::default(),
            check_attempts: default_check_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            wait_for_primary: true,
            primary_timeout_secs: default_primary_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl BootstrapConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: BootstrapConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use the built-in defaults
    pub fn load(path: Option<&PathBuf>) -> crate::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.uri.is_none() {
            validate_host(&self.node.address)
                .map_err(|e| crate::Error::Config(format!("node.address: {}", e)))?;
        }

        if let Some(uri) = &self.node.uri {
            if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
                return Err(crate::Error::Config(
                    "node.uri must start with mongodb:// or mongodb+srv://".into(),
                ));
            }
        }

        if self.bootstrap.check_attempts == 0 {
            return Err(crate::Error::Config("bootstrap.check_attempts must be at least 1".into()));
        }

        if self.bootstrap.poll_interval_ms == 0 {
            return Err(crate::Error::Config("bootstrap.poll_interval_ms cannot be 0".into()));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(crate::Error::Config(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }

        self.replica_set.validate()
    }

    /// Connection string for the target node
    pub fn connection_uri(&self) -> String {
        match &self.node.uri {
            Some(uri) => uri.clone(),
            None => format!("mongodb://{}", self.node.address),
        }
    }

    /// Address used in logs and errors; credentials in `node.uri` are never shown
    pub fn display_address(&self) -> &str {
        match &self.node.uri {
            Some(uri) => {
                let rest = uri.split_once("://").map_or(uri.as_str(), |(_, r)| r);
                let rest = rest.rsplit_once('@').map_or(rest, |(_, r)| r);
                rest.split(['/', '?']).next().unwrap_or(rest)
            }
            None => &self.node.address,
        }
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.node.connect_timeout_secs)
    }

    /// Get server selection timeout as Duration
    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_secs(self.node.server_selection_timeout_secs)
    }
}
