//! MCP transport implementations.
//!
//! A transport owns the wire channel to one server and correlates JSON-RPC
//! responses with requests. Three transports are provided:
//!
//! - [`StdioTransport`]: spawns a child process and exchanges
//!   newline-delimited JSON over its stdin/stdout.
//! - [`SseTransport`]: holds a long-lived event stream open and POSTs
//!   requests to the endpoint the server announces on it.
//! - [`HttpTransport`]: streamable HTTP, one POST per request with the reply
//!   in the response body.

mod http;
mod pending;
mod sse;
mod stdio;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::config::TransportKind;
use crate::error::{McpError, TransportError};
use crate::protocol::RequestId;

pub use http::HttpTransport;
pub use pending::{PendingRequests, Reply};
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Details about an established channel, for logs and status output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionInfo {
    /// Child process id (stdio).
    pub pid: Option<u32>,
    /// URL requests are sent to (sse/http).
    pub endpoint: Option<String>,
    /// Server-assigned session id, if any.
    pub session_id: Option<String>,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(pid) = self.pid {
            parts.push(format!("pid {}", pid));
        }
        if let Some(endpoint) = &self.endpoint {
            parts.push(format!("endpoint {}", endpoint));
        }
        if let Some(session) = &self.session_id {
            parts.push(format!("session {}", session));
        }
        if parts.is_empty() {
            write!(f, "connected")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Wire channel to a single MCP server.
///
/// Implementations must be safe to share between tasks: `request` may be
/// called concurrently and each call resolves with the response carrying
/// its own id.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Which wire protocol this is.
    fn kind(&self) -> TransportKind;

    /// Open the channel. Completes only once requests can be sent.
    async fn connect(&self) -> Result<ConnectionInfo, TransportError>;

    /// Close the channel and release its resources. Idempotent.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Send a request and wait for the matching response's result.
    async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError>;

    /// Send a notification; no response is expected.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// Forget an outstanding request, e.g. after the caller timed out.
    async fn cancel(&self, _id: &RequestId) {}

    /// Fail every outstanding request.
    async fn cancel_all(&self) {}

    /// Whether the channel is believed to be open.
    fn is_connected(&self) -> bool;
}

/// Convert configured headers into a reqwest header map.
pub(crate) fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, McpError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| McpError::init_failed(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| McpError::init_failed(format!("invalid value for header '{}': {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Parse a configured URL.
pub(crate) fn parse_url(raw: &str) -> Result<url::Url, TransportError> {
    url::Url::parse(raw).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}
