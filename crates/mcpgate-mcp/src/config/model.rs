//! Typed model of the MCP servers file.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire transport used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON-RPC.
    Stdio,
    /// Long-lived GET event stream plus POSTs to an advertised endpoint.
    Sse,
    /// Streamable HTTP: one POST per request.
    Http,
}

impl TransportKind {
    /// All accepted transport names.
    pub const ALL: [&'static str; 3] = ["stdio", "sse", "http"];
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "http" => Ok(Self::Http),
            other => Err(format!(
                "unknown transport '{}', expected one of {:?}",
                other,
                Self::ALL
            )),
        }
    }
}

/// Default priority when a server does not set one.
pub const DEFAULT_PRIORITY: u32 = 50;

/// Declarative description of one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique kebab-case name; also the namespace prefix.
    pub name: String,
    /// Wire transport.
    pub transport: TransportKind,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Command to execute (stdio).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Command arguments (stdio).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment merged over the parent's (stdio).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Working directory (stdio).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Endpoint URL (sse/http).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra request headers (sse/http).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Lower is preferred.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Capability tags used for routing.
    #[serde(default)]
    pub domains: BTreeSet<String>,
    /// A failing critical server aborts multi-server initialization.
    #[serde(default)]
    pub critical: bool,
    /// Disabled servers are skipped entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Request timeout in seconds; falls back to `defaults.timeout`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    /// Connection attempts; falls back to `defaults.retry_attempts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    /// Initial retry delay in seconds; falls back to `defaults.retry_delay`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<f64>,
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// A stdio server.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(name, TransportKind::Stdio).with_command(command)
    }

    /// An SSE server.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, TransportKind::Sse).with_url(url)
    }

    /// A streamable HTTP server.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, TransportKind::Http).with_url(url)
    }

    fn new(name: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            transport,
            description: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            headers: HashMap::new(),
            priority: DEFAULT_PRIORITY,
            domains: BTreeSet::new(),
            critical: false,
            enabled: true,
            timeout: None,
            retry_attempts: None,
            retry_delay: None,
        }
    }

    /// Set the command.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Add arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a routing domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.insert(domain.into());
        self
    }

    /// Mark the server critical.
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Set the request timeout in seconds.
    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Set the number of connection attempts.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Effective request timeout.
    pub fn request_timeout(&self, defaults: &ServerDefaults) -> Duration {
        secs(self.timeout.unwrap_or(defaults.timeout))
    }

    /// Effective connection attempts.
    pub fn connect_attempts(&self, defaults: &ServerDefaults) -> u32 {
        self.retry_attempts.unwrap_or(defaults.retry_attempts)
    }

    /// Effective initial retry delay.
    pub fn initial_retry_delay(&self, defaults: &ServerDefaults) -> Duration {
        secs(self.retry_delay.unwrap_or(defaults.retry_delay))
    }
}

/// Largest accepted value, in seconds, for any duration setting.
pub const MAX_SECONDS: f64 = 86_400.0;

/// Convert fractional seconds, clamped to `0..=MAX_SECONDS`. NaN becomes zero.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_SECONDS)).unwrap_or_default()
}

/// Values applied to every server that does not override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDefaults {
    /// Request timeout in seconds.
    pub timeout: f64,
    /// Connection attempts.
    pub retry_attempts: u32,
    /// Initial retry delay in seconds.
    pub retry_delay: f64,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Upper bound on a single retry delay in seconds.
    pub max_delay: f64,
    /// Grace period before a stdio server is killed, in seconds.
    pub shutdown_timeout: f64,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            timeout: 30.0,
            retry_attempts: 3,
            retry_delay: 1.0,
            backoff_factor: 2.0,
            max_delay: 30.0,
            shutdown_timeout: 5.0,
        }
    }
}

/// The validated, environment-resolved servers file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationModel {
    /// Semantic version of the file format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Declared servers.
    pub servers: Vec<ServerConfig>,
    /// Defaults; always present after loading.
    #[serde(default)]
    pub defaults: ServerDefaults,
    /// Arbitrary operator metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ConfigurationModel {
    /// A model holding the given servers and default settings.
    pub fn with_servers(servers: Vec<ServerConfig>) -> Self {
        Self {
            version: None,
            servers,
            defaults: ServerDefaults::default(),
            metadata: None,
        }
    }

    /// Servers that are not disabled.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_builder() {
        let server = ServerConfig::stdio("postgres-db", "mcp-postgres")
            .with_args(["--read-only"])
            .with_env("PGHOST", "localhost")
            .with_domain("sql")
            .with_priority(10)
            .with_critical(true);

        assert_eq!(server.transport, TransportKind::Stdio);
        assert_eq!(server.command.as_deref(), Some("mcp-postgres"));
        assert_eq!(server.args, vec!["--read-only"]);
        assert!(server.domains.contains("sql"));
        assert!(server.critical);
        assert!(server.enabled);
    }

    #[test]
    fn test_effective_settings_fall_back_to_defaults() {
        let defaults = ServerDefaults::default();
        let server = ServerConfig::sse("catalog", "http://localhost:8000/sse");
        assert_eq!(server.request_timeout(&defaults), Duration::from_secs(30));
        assert_eq!(server.connect_attempts(&defaults), 3);

        let server = server.with_timeout(2.5).with_retry_attempts(1);
        assert_eq!(server.request_timeout(&defaults), Duration::from_millis(2500));
        assert_eq!(server.connect_attempts(&defaults), 1);
    }

    #[test]
    fn test_secs_saturates() {
        assert_eq!(secs(-3.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(1e30), Duration::from_secs(86_400));
        assert_eq!(secs(f64::INFINITY), Duration::from_secs(86_400));
    }

    #[test]
    fn test_deserialize_fills_optional_fields() {
        let server: ServerConfig = serde_json::from_value(json!({
            "name": "products",
            "transport": "http",
            "url": "http://localhost:9000/mcp"
        }))
        .unwrap();

        assert_eq!(server.priority, DEFAULT_PRIORITY);
        assert!(server.enabled);
        assert!(!server.critical);
        assert!(server.domains.is_empty());
    }

    #[test]
    fn test_transport_from_str() {
        assert_eq!("sse".parse::<TransportKind>().unwrap(), TransportKind::Sse);
        assert!("websocket".parse::<TransportKind>().is_err());
    }
}
