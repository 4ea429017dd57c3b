//! MCP-specific error types.

use std::path::PathBuf;
use std::time::Duration;

use mcpgate_core::config::ValidationIssue;
use thiserror::Error;

use crate::adapter::AdapterState;
use crate::client::ConnectionState;
use crate::protocol::JsonRpcError;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// Failed to terminate the process.
    #[error("failed to terminate process: {0}")]
    TerminateFailed(std::io::Error),

    /// The server process is gone.
    #[error("server process exited ({status}){}", stderr_suffix(.stderr))]
    ProcessExited { status: String, stderr: String },

    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request was answered with an unexpected status.
    #[error("unexpected HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The stream did not look like an MCP endpoint.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A configured or advertised URL could not be parsed.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Could not establish a channel to the server.
    #[error("connection error: {0}")]
    Connection(String),

    /// A call was made while the client is not connected.
    #[error("server '{server}' is not connected (state: {state})")]
    NotConnected {
        server: String,
        state: ConnectionState,
    },

    /// Protocol-level error (malformed messages, unexpected payloads).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned a JSON-RPC error response.
    #[error("server error (code {code}): {message}")]
    ServerError { code: i32, message: String },

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Server not found by name.
    #[error("server not found: {0}")]
    ServerNotFound(String),

    /// Server already registered with this name.
    #[error("server already exists: {0}")]
    ServerAlreadyExists(String),

    /// Tool not found on any server.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// A raw tool name is exposed by more than one server.
    #[error("tool '{name}' is ambiguous, use one of: {}", .candidates.join(", "))]
    AmbiguousTool {
        name: String,
        candidates: Vec<String>,
    },

    /// Resource not found on any server.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// A request id was reused while still outstanding.
    #[error("request id {0} is already pending")]
    DuplicateRequestId(String),

    /// Client could not be built from its configuration.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an initialization failed error.
    pub fn init_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a server error from JSON-RPC error.
    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    /// Whether the server rejected the method as unknown.
    pub fn is_method_not_found(&self) -> bool {
        matches!(
            self,
            Self::ServerError { code, .. } if *code == JsonRpcError::METHOD_NOT_FOUND
        )
    }

    /// Whether the underlying channel is gone and the client must reconnect.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Transport(
                TransportError::ConnectionClosed
                    | TransportError::ProcessExited { .. }
                    | TransportError::NotConnected
            )
        )
    }
}

impl From<JsonRpcError> for McpError {
    fn from(e: JsonRpcError) -> Self {
        Self::server_error(e.code, e.message)
    }
}

/// Errors from loading the MCP servers file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("failed to parse {origin}: {message} (line {line}, column {column})")]
    Parse {
        origin: String,
        line: usize,
        column: usize,
        message: String,
    },

    /// One or more fields failed validation.
    #[error("configuration is invalid:\n  {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// Referenced environment variables have no value and no default.
    #[error("missing environment variables: {}", .missing.join(", "))]
    Environment { missing: Vec<String> },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  ")
}

/// Errors raised by the adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// A call was made before `initialize()` completed.
    #[error("adapter is not ready (state: {0})")]
    NotInitialized(AdapterState),

    /// The servers file could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A server marked critical failed to initialize.
    #[error("critical server '{server}' failed: {reason}")]
    CriticalServerFailed { server: String, reason: String },

    /// Multi-server mode ended with nothing connected.
    #[error("no MCP servers could be initialized ({} skipped)", .skipped.len())]
    NoServersAvailable { skipped: Vec<String> },

    /// The single-server backend could not be brought up.
    #[error("single-server backend failed: {0}")]
    SingleServer(McpError),

    /// Multi-server init failed and the fallback failed too.
    #[error("multi-server initialization failed ({multi}); single-server fallback failed: {fallback}")]
    FallbackFailed { multi: String, fallback: String },

    /// A backend call failed and fallback is disabled.
    #[error("backend error: {0}")]
    Backend(#[from] McpError),
}

impl From<McpError> for mcpgate_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Timeout(_) => mcpgate_core::Error::Timeout(e.to_string()),
            other => mcpgate_core::Error::Mcp(other.to_string()),
        }
    }
}

impl From<ConfigError> for mcpgate_core::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::FileNotFound(path) => {
                mcpgate_core::Error::ServersFileNotFound(path.display().to_string())
            }
            ConfigError::Environment { missing } => mcpgate_core::Error::MissingEnvironment(missing),
            ConfigError::Validation(issues) => mcpgate_core::Error::InvalidServers(
                issues.iter().map(ToString::to_string).collect(),
            ),
            other => mcpgate_core::Error::Config(other.to_string()),
        }
    }
}

impl From<AdapterError> for mcpgate_core::Error {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Config(config) => config.into(),
            AdapterError::Backend(mcp) => mcp.into(),
            other => mcpgate_core::Error::Adapter(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_core::config::IssueSeverity;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(err.to_string(), "connection closed");

        let err = TransportError::ProcessExited {
            status: "exit status: 1".to_string(),
            stderr: "boom\n".to_string(),
        };
        assert_eq!(err.to_string(), "server process exited (exit status: 1) | stderr: boom");
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::ServerNotFound("test-server".to_string());
        assert_eq!(err.to_string(), "server not found: test-server");

        let err = McpError::server_error(-32600, "Invalid request");
        assert_eq!(err.to_string(), "server error (code -32600): Invalid request");

        let err = McpError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "request timed out after 5s");
    }

    #[test]
    fn test_method_not_found_detection() {
        assert!(McpError::server_error(-32601, "Method not found").is_method_not_found());
        assert!(!McpError::server_error(-32600, "Invalid").is_method_not_found());
        assert!(!McpError::protocol("nope").is_method_not_found());
    }

    #[test]
    fn test_validation_error_lists_every_issue() {
        let err = ConfigError::Validation(vec![
            ValidationIssue {
                severity: IssueSeverity::Error,
                field: "servers[0].name".to_string(),
                message: "must be kebab-case".to_string(),
            },
            ValidationIssue {
                severity: IssueSeverity::Error,
                field: "servers[1].priority".to_string(),
                message: "must be between 1 and 100".to_string(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("servers[0].name: must be kebab-case"));
        assert!(text.contains("servers[1].priority: must be between 1 and 100"));
    }

    #[test]
    fn test_config_error_to_core_error() {
        let err = ConfigError::Environment {
            missing: vec!["A".to_string(), "B".to_string()],
        };
        let core_err: mcpgate_core::Error = err.into();
        assert!(matches!(
            core_err,
            mcpgate_core::Error::MissingEnvironment(ref names) if names.len() == 2
        ));
    }

    #[test]
    fn test_mcp_error_to_core_error() {
        let err = McpError::protocol("test error");
        let core_err: mcpgate_core::Error = err.into();
        assert!(matches!(core_err, mcpgate_core::Error::Mcp(_)));
    }
}
