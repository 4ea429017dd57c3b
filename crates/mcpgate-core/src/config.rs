//! Gateway settings for mcpgate.
//!
//! These settings decide how the MCP backend is assembled at startup. The
//! per-server MCP configuration lives in a separate JSON file whose path is
//! part of [`AdapterConfig`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Transports accepted for the single-server backend.
pub const VALID_TRANSPORTS: [&str; 3] = ["stdio", "sse", "http"];

/// Main settings struct for mcpgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adapter settings
    pub adapter: AdapterConfig,
    /// Backend used in single-server mode and as the fallback
    pub single_server: SingleServerConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// How the adapter assembles its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterMode {
    /// Pick single or multi based on the servers file.
    #[default]
    Auto,
    /// Wrap the single configured server directly.
    Single,
    /// Aggregate every server from the servers file.
    Multi,
}

impl fmt::Display for AdapterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Backend mode
    pub mode: AdapterMode,
    /// Fall back to the single server when multi-server init fails
    pub fallback_enabled: bool,
    /// Path to the MCP servers JSON file
    pub servers_config: PathBuf,
    /// Per-server initialization budget in seconds
    pub init_timeout_secs: u64,
    /// Fail the load when an environment variable has no value and no default
    pub strict_env: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            mode: AdapterMode::Auto,
            fallback_enabled: true,
            servers_config: PathBuf::from("config/mcp-servers.json"),
            init_timeout_secs: 30,
            strict_env: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleServerConfig {
    /// Server name used in logs and stats
    pub name: String,
    /// Transport: stdio, sse or http
    pub transport: String,
    /// Endpoint for sse/http
    pub url: Option<String>,
    /// Extra HTTP headers for sse/http
    pub headers: HashMap<String, String>,
    /// Command for stdio
    pub command: Option<String>,
    /// Command arguments for stdio
    pub args: Vec<String>,
    /// Extra environment for stdio
    pub env: HashMap<String, String>,
    /// Working directory for stdio
    pub cwd: Option<PathBuf>,
    /// Request timeout in seconds
    pub timeout_secs: f64,
    /// Connection attempts before giving up
    pub retry_attempts: u32,
}

impl Default for SingleServerConfig {
    fn default() -> Self {
        Self {
            name: "primary".to_string(),
            transport: "sse".to_string(),
            url: Some("http://localhost:8000/sse".to_string()),
            headers: HashMap::new(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            timeout_secs: 30.0,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Merge another result into this one.
    pub fn extend(&mut self, other: ValidationResult) {
        self.issues.extend(other.issues);
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A single validation issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "servers[0].priority")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load settings from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(None).extract()
    }

    /// Load settings, layering an explicit file over the standard locations.
    pub fn load_from(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(".mcpgate/config.toml"));

        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed("MCPGATE_").split("__"))
    }

    /// Load and validate settings.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, Error> {
        let config = Self::load_from(path).map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result.errors().iter().map(|e| e.to_string()).collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the settings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.adapter.init_timeout_secs == 0 {
            result.add_error(
                "adapter.init_timeout_secs",
                "init_timeout_secs must be greater than 0",
            );
        } else if self.adapter.init_timeout_secs > 300 {
            result.add_warning(
                "adapter.init_timeout_secs",
                "init_timeout_secs is very high (> 300s), startup may stall on dead servers",
            );
        }

        if self.adapter.servers_config.as_os_str().is_empty() {
            result.add_error("adapter.servers_config", "servers_config path cannot be empty");
        }

        let server = &self.single_server;
        if server.name.is_empty() {
            result.add_error("single_server.name", "Server name cannot be empty");
        }

        if !VALID_TRANSPORTS.contains(&server.transport.as_str()) {
            result.add_error(
                "single_server.transport",
                format!(
                    "Invalid transport '{}'. Valid values: {:?}",
                    server.transport, VALID_TRANSPORTS
                ),
            );
        } else if server.transport == "stdio" {
            if server.command.as_deref().map_or(true, str::is_empty) {
                result.add_error("single_server.command", "stdio transport requires a command");
            }
        } else {
            match server.url.as_deref() {
                None | Some("") => {
                    result.add_error(
                        "single_server.url",
                        format!("{} transport requires a url", server.transport),
                    );
                }
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    result.add_error("single_server.url", "url must start with http:// or https://");
                }
                Some(_) => {}
            }
        }

        if server.timeout_secs <= 0.0 {
            result.add_error("single_server.timeout_secs", "timeout_secs must be greater than 0");
        }

        if server.retry_attempts == 0 {
            result.add_warning(
                "single_server.retry_attempts",
                "retry_attempts is 0, a single connection attempt will be made",
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            result.add_error(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Valid values: {:?}",
                    self.logging.level, valid_levels
                ),
            );
        }

        result
    }

    /// Render the effective settings as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("mcpgate"))
            .unwrap_or_else(|| PathBuf::from("~/.config/mcpgate"))
    }
}
