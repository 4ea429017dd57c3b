//! Builds clients from server configuration.

use crate::client::{ClientOptions, McpClient};
use crate::config::{secs, ServerConfig, ServerDefaults, TransportKind};
use crate::error::McpError;
use crate::transport::{header_map, ClientTransport, HttpTransport, SseTransport, StdioTransport};

/// Creates a client for a configured server.
///
/// The aggregator goes through this seam so tests can substitute fakes.
pub trait ClientFactory: Send + Sync {
    /// Build a disconnected client for `server`.
    fn create(&self, server: &ServerConfig, defaults: &ServerDefaults)
        -> Result<McpClient, McpError>;
}

/// Factory producing clients over the real transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportClientFactory;

impl TransportClientFactory {
    /// Build only the transport for `server`.
    pub fn transport(
        server: &ServerConfig,
        defaults: &ServerDefaults,
    ) -> Result<Box<dyn ClientTransport>, McpError> {
        let timeout = server.request_timeout(defaults);

        let transport: Box<dyn ClientTransport> = match server.transport {
            TransportKind::Stdio => {
                let command = server.command.as_deref().ok_or_else(|| {
                    McpError::init_failed(format!("server '{}' has no command", server.name))
                })?;
                Box::new(
                    StdioTransport::new(&server.name, command)
                        .with_args(server.args.clone())
                        .with_env(server.env.clone())
                        .with_cwd(server.cwd.clone())
                        .with_shutdown_timeout(secs(defaults.shutdown_timeout)),
                )
            }
            TransportKind::Sse => {
                let url = required_url(server)?;
                Box::new(
                    SseTransport::new(&server.name, url)?
                        .with_headers(header_map(&server.headers)?)
                        .with_connect_timeout(timeout),
                )
            }
            TransportKind::Http => {
                let url = required_url(server)?;
                Box::new(
                    HttpTransport::new(&server.name, url)?
                        .with_headers(header_map(&server.headers)?)
                        .with_request_timeout(timeout),
                )
            }
        };
        Ok(transport)
    }
}

fn required_url(server: &ServerConfig) -> Result<&str, McpError> {
    server.url.as_deref().ok_or_else(|| {
        McpError::init_failed(format!(
            "server '{}' uses {} transport but has no url",
            server.name, server.transport
        ))
    })
}

impl ClientFactory for TransportClientFactory {
    fn create(
        &self,
        server: &ServerConfig,
        defaults: &ServerDefaults,
    ) -> Result<McpClient, McpError> {
        let transport = Self::transport(server, defaults)?;
        Ok(McpClient::new(
            &server.name,
            transport,
            ClientOptions::from_server(server, defaults),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnectionState;

    #[test]
    fn test_creates_each_transport() {
        let defaults = ServerDefaults::default();
        let factory = TransportClientFactory;

        for (server, kind) in [
            (ServerConfig::stdio("db", "mcp-db"), TransportKind::Stdio),
            (
                ServerConfig::sse("catalog", "http://localhost:8000/sse"),
                TransportKind::Sse,
            ),
            (
                ServerConfig::http("search", "https://example.com/mcp")
                    .with_header("Authorization", "Bearer x"),
                TransportKind::Http,
            ),
        ] {
            let client = factory.create(&server, &defaults).unwrap();
            assert_eq!(client.name(), server.name);
            assert_eq!(client.state(), ConnectionState::Disconnected);
            assert_eq!(
                TransportClientFactory::transport(&server, &defaults)
                    .unwrap()
                    .kind(),
                kind
            );
        }
    }

    #[test]
    fn test_missing_url_is_init_failure() {
        let mut server = ServerConfig::sse("catalog", "http://localhost:8000/sse");
        server.url = None;
        let err = TransportClientFactory
            .create(&server, &ServerDefaults::default())
            .unwrap_err();
        assert!(matches!(err, McpError::InitializationFailed(_)));
    }

    #[test]
    fn test_bad_header_is_init_failure() {
        let server = ServerConfig::http("search", "https://example.com/mcp")
            .with_header("bad header", "x");
        assert!(TransportClientFactory
            .create(&server, &ServerDefaults::default())
            .is_err());
    }
}
