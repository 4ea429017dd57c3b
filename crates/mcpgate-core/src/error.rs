//! Error types for mcpgate.
//!
//! Library crates keep their own typed errors and convert into [`Error`] at
//! the application boundary, where a recovery suggestion can be attached.

use thiserror::Error;

/// Result type alias using the gateway error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mcpgate.
#[derive(Error, Debug)]
pub enum Error {
    /// Gateway settings could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// The MCP servers file is missing
    #[error("Servers file not found: {0}")]
    ServersFileNotFound(String),

    /// Environment variables referenced by the servers file are unset
    #[error("Missing environment variables: {}", .0.join(", "))]
    MissingEnvironment(Vec<String>),

    /// The servers file failed validation
    #[error("Invalid servers file:\n  {}", .0.join("\n  "))]
    InvalidServers(Vec<String>),

    /// MCP client or protocol error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Adapter misuse or fatal initialization failure
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// A request exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your settings at ~/.config/mcpgate/config.toml"),
            Error::ServersFileNotFound(_) => {
                Some("Create config/mcp-servers.json or set MCPGATE_ADAPTER__SERVERS_CONFIG")
            }
            Error::MissingEnvironment(_) => {
                Some("Export the listed variables or give them defaults with ${NAME:-default}")
            }
            Error::InvalidServers(_) => Some("Run 'mcpgate check' to see every problem at once"),
            Error::Adapter(_) => Some("Enable adapter.fallback_enabled to survive server failures"),
            Error::Timeout(_) => Some("Raise the server timeout or check that the server is responsive"),
            _ => None,
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_environment_lists_all() {
        let err = Error::MissingEnvironment(vec!["DB_URL".to_string(), "API_KEY".to_string()]);
        assert_eq!(err.to_string(), "Missing environment variables: DB_URL, API_KEY");
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_invalid_servers_is_itemized() {
        let err = Error::InvalidServers(vec![
            "servers[0].name: bad".to_string(),
            "servers[1].priority: bad".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("servers[0].name"));
        assert!(text.contains("servers[1].priority"));
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::Adapter("not ready".to_string());
        let formatted = format_error_with_suggestion(&err);
        assert!(formatted.contains("Suggestion:"));

        let err = Error::Internal("boom".to_string());
        assert!(!format_error_with_suggestion(&err).contains("Suggestion:"));
    }
}
