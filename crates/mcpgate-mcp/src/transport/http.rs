//! Streamable HTTP transport: one POST per request.
//!
//! The reply comes back in the POST response, either as a JSON body or as a
//! short event stream that ends once the response has been sent. A session
//! id handed out by the server is echoed on every later request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{parse_url, ClientTransport, ConnectionInfo};
use crate::config::TransportKind;
use crate::error::{McpError, TransportError};
use crate::protocol::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, RequestId};
use crate::sse::SseParser;

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Streamable HTTP transport for MCP servers.
pub struct HttpTransport {
    server: String,
    url: Url,
    headers: HeaderMap,
    http: Client,
    request_timeout: Duration,
    session_id: RwLock<Option<String>>,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Create a transport posting to `url`.
    pub fn new(server: impl Into<String>, url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            server: server.into(),
            url: parse_url(url)?,
            headers: HeaderMap::new(),
            http: Client::new(),
            request_timeout: Duration::from_secs(30),
            session_id: RwLock::new(None),
            connected: AtomicBool::new(false),
        })
    }

    /// Extra headers sent on every request.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Bound on a single HTTP exchange.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn with_session(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .headers(self.headers.clone())
            .timeout(self.request_timeout);
        match self
            .session_id
            .read()
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            Some(value) => builder.header(SESSION_HEADER, value),
            None => builder,
        }
    }

    async fn post(&self, body: &impl serde::Serialize) -> Result<Response, TransportError> {
        let response = self
            .with_session(self.http.post(self.url.clone()))
            .header(ACCEPT, ACCEPT_BOTH)
            .json(body)
            .send()
            .await?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write();
            if current.as_deref() != Some(id) {
                debug!(server = %self.server, session_id = id, "MCP session assigned");
                *current = Some(id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Find the response for `id` in a POST reply body.
fn extract_response(
    content_type: &str,
    body: &[u8],
    id: &RequestId,
) -> Result<IncomingMessage, McpError> {
    let candidates: Vec<Value> = if content_type.starts_with("text/event-stream") {
        let mut parser = SseParser::new();
        let mut events = parser.feed(body);
        events.extend(parser.finish());
        events.into_iter().filter_map(|event| event.json()).collect()
    } else {
        match serde_json::from_slice::<Value>(body)? {
            Value::Array(batch) => batch,
            single => vec![single],
        }
    };

    candidates
        .into_iter()
        .filter_map(|value| serde_json::from_value::<IncomingMessage>(value).ok())
        .find(|message| message.is_response() && message.id.as_ref() == Some(id))
        .ok_or_else(|| McpError::protocol(format!("no response for request {} in reply", id)))
}

#[async_trait]
impl ClientTransport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&self) -> Result<ConnectionInfo, TransportError> {
        // The session is established by the initialize request itself.
        self.connected.store(true, Ordering::SeqCst);
        Ok(ConnectionInfo {
            pid: None,
            endpoint: Some(self.url.to_string()),
            session_id: self.session_id(),
        })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);

        let Some(session_id) = self.session_id.write().take() else {
            return Ok(());
        };

        let result = self
            .http
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session_id.as_str())
            .timeout(self.request_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(server = %self.server, "MCP session terminated");
            }
            Ok(response) => debug!(
                server = %self.server,
                status = %response.status(),
                "Server declined session termination"
            ),
            Err(e) => warn!(server = %self.server, error = %e, "Failed to terminate MCP session"),
        }
        Ok(())
    }

    async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }

        debug!(server = %self.server, id = %id, method, "Sending request");
        let request = JsonRpcRequest::new(id.clone(), method, params);
        let response = self.post(&request).await?;

        if response.status() == StatusCode::ACCEPTED || response.status() == StatusCode::NO_CONTENT
        {
            return Err(McpError::protocol(format!(
                "server accepted request {} without replying",
                id
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response.bytes().await.map_err(TransportError::Http)?;

        extract_response(&content_type, &body, &id)?.into_result()
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        self.post(&notification).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_body() {
        let body = br#"{"jsonrpc":"2.0","id":"3","result":{"tools":[]}}"#;
        let message = extract_response("application/json", body, &RequestId::from("3")).unwrap();
        assert_eq!(message.into_result().unwrap(), json!({"tools": []}));
    }

    #[test]
    fn test_extract_batch_body() {
        let body = br#"[
            {"jsonrpc":"2.0","method":"notifications/progress","params":{}},
            {"jsonrpc":"2.0","id":"8","result":{"ok":true}}
        ]"#;
        let message = extract_response("application/json", body, &RequestId::from("8")).unwrap();
        assert_eq!(message.into_result().unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_extract_event_stream_body() {
        let body = concat!(
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":\"2\",\"result\":{\"n\":1}}"
        );
        let message = extract_response(
            "text/event-stream; charset=utf-8",
            body.as_bytes(),
            &RequestId::from("2"),
        )
        .unwrap();
        assert_eq!(message.into_result().unwrap(), json!({"n": 1}));
    }

    #[test]
    fn test_extract_missing_response() {
        let body = br#"{"jsonrpc":"2.0","id":"1","result":{}}"#;
        let err = extract_response("application/json", body, &RequestId::from("2")).unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_without_session() {
        let transport = HttpTransport::new("test", "http://localhost:1/mcp").unwrap();
        let info = transport.connect().await.unwrap();
        assert_eq!(info.endpoint.as_deref(), Some("http://localhost:1/mcp"));
        assert!(transport.is_connected());

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }
}
