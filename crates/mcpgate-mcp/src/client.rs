//! MCP client implementation.
//!
//! [`McpClient`] is the transport-agnostic half of a server connection: the
//! connection state machine, retry with backoff, per-request timeouts,
//! statistics and the typed MCP operations. Wire details live behind
//! [`ClientTransport`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{secs, ServerConfig, ServerDefaults, TransportKind};
use crate::error::McpError;
use crate::protocol::{
    methods, CallToolParams, CallToolResult, InitializeParams, InitializeResult,
    ListResourcesResult, ListToolsResult, PaginatedParams, ReadResourceParams, ReadResourceResult,
    RequestId, Resource, ServerInfo, Tool,
};
use crate::transport::{ClientTransport, ConnectionInfo};

/// Timeout applied to `ping` regardless of the configured request timeout.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state for an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel is open.
    Disconnected,
    /// A connection attempt is in progress.
    Initializing,
    /// The channel is open and requests may be sent.
    Connected,
    /// Tearing down before connecting again.
    Reconnecting,
    /// The last connection attempt failed or the channel was lost.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Initializing => write!(f, "initializing"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Add up to 10% random jitter.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based) without jitter, capped.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before retry number `attempt` (0-based), with jitter when enabled.
    ///
    /// Never exceeds `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let jitter = rand::rng().random_range(0.0..=0.1) * base.as_secs_f64();
        Duration::from_secs_f64(base.as_secs_f64() + jitter).min(self.max_delay.max(base))
    }
}

/// Per-client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Timeout for every request except `ping`.
    pub timeout: Duration,
    /// Timeout for `ping`.
    pub ping_timeout: Duration,
    /// Connection retry policy.
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            ping_timeout: PING_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientOptions {
    /// Effective options for a configured server.
    pub fn from_server(server: &ServerConfig, defaults: &ServerDefaults) -> Self {
        Self {
            timeout: server.request_timeout(defaults),
            ping_timeout: PING_TIMEOUT,
            retry: RetryPolicy {
                max_attempts: server.connect_attempts(defaults).max(1),
                initial_delay: server.initial_retry_delay(defaults),
                backoff_factor: defaults.backoff_factor,
                max_delay: secs(defaults.max_delay),
                jitter: true,
            },
        }
    }
}

/// Outcome of a successful [`McpClient::connect`].
#[derive(Debug, Clone)]
pub struct ConnectionResult {
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// When the channel was established.
    pub connected_at: DateTime<Utc>,
    /// Transport-specific details.
    pub info: ConnectionInfo,
}

/// Counters kept while a client is connected.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStats {
    /// When the current connection was established.
    pub connected_at: DateTime<Utc>,
    /// Completed requests, successful or not.
    pub requests: u64,
    /// Requests that failed, timed out or returned `isError`.
    pub errors: u64,
    /// Rolling mean latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl ClientStats {
    fn new(connected_at: DateTime<Utc>) -> Self {
        Self {
            connected_at,
            requests: 0,
            errors: 0,
            avg_latency_ms: 0.0,
            last_error: None,
        }
    }

    fn record(&mut self, latency: Duration, error: Option<String>) {
        self.requests += 1;
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / self.requests as f64;
        if let Some(error) = error {
            self.errors += 1;
            self.last_error = Some(error);
        }
    }
}

/// A client for one MCP server.
pub struct McpClient {
    name: String,
    transport: Box<dyn ClientTransport>,
    options: ClientOptions,
    state: RwLock<ConnectionState>,
    stats: Mutex<Option<ClientStats>>,
    request_counter: AtomicU64,
    server_info: RwLock<Option<InitializeResult>>,
}

impl McpClient {
    /// Create a client over `transport`. Nothing is opened until `connect`.
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn ClientTransport>,
        options: ClientOptions,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            options,
            state: RwLock::new(ConnectionState::Disconnected),
            stats: Mutex::new(None),
            request_counter: AtomicU64::new(1),
            server_info: RwLock::new(None),
        }
    }

    /// Server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport this client speaks.
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether requests may be sent.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Client settings.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Statistics for the current connection.
    pub fn stats(&self) -> Option<ClientStats> {
        self.stats.lock().clone()
    }

    /// Result of the last successful `initialize`.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info
            .read()
            .as_ref()
            .map(|result| result.server_info.clone())
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(server = %self.name, from = %previous, to = %state, "Connection state changed");
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::String(self.request_counter.fetch_add(1, Ordering::SeqCst).to_string())
    }

    /// Open the channel, retrying with exponential backoff.
    pub async fn connect(&self) -> Result<ConnectionResult, McpError> {
        if self.is_connected() {
            return Err(McpError::connection(format!(
                "server '{}' is already connected",
                self.name
            )));
        }

        self.set_state(ConnectionState::Initializing);
        let retry = &self.options.retry;
        let attempts = retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = retry.calculate_delay(attempt - 1);
                debug!(
                    server = %self.name,
                    attempt = attempt + 1,
                    delay = ?delay,
                    "Retrying connection"
                );
                tokio::time::sleep(delay).await;
            }

            match self.transport.connect().await {
                Ok(info) => {
                    let connected_at = Utc::now();
                    *self.stats.lock() = Some(ClientStats::new(connected_at));
                    self.set_state(ConnectionState::Connected);
                    info!(
                        server = %self.name,
                        transport = %self.transport.kind(),
                        attempts = attempt + 1,
                        "{}",
                        info
                    );
                    return Ok(ConnectionResult {
                        attempts: attempt + 1,
                        connected_at,
                        info,
                    });
                }
                Err(e) => {
                    warn!(
                        server = %self.name,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Connection attempt failed"
                    );
                    last_error = e.to_string();
                    // Release anything a half-open attempt left behind.
                    let _ = self.transport.disconnect().await;
                }
            }
        }

        self.set_state(ConnectionState::Error);
        Err(McpError::connection(format!(
            "failed to connect to '{}' after {} attempt(s): {}",
            self.name, attempts, last_error
        )))
    }

    /// Close the channel. A no-op when already disconnected.
    pub async fn disconnect(&self) -> Result<(), McpError> {
        if self.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        debug!(server = %self.name, "Disconnecting");
        self.transport.cancel_all().await;
        let result = self.transport.disconnect().await;

        *self.stats.lock() = None;
        *self.server_info.write() = None;
        self.set_state(ConnectionState::Disconnected);

        match result {
            Ok(()) => {
                info!(server = %self.name, "Disconnected");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Disconnect, then connect again.
    pub async fn reconnect(&self) -> Result<ConnectionResult, McpError> {
        self.set_state(ConnectionState::Reconnecting);
        self.transport.cancel_all().await;
        if let Err(e) = self.transport.disconnect().await {
            warn!(server = %self.name, error = %e, "Teardown before reconnect failed");
        }
        *self.stats.lock() = None;
        self.connect().await
    }

    fn ensure_connected(&self) -> Result<(), McpError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            state => Err(McpError::NotConnected {
                server: self.name.clone(),
                state,
            }),
        }
    }

    /// Send a request with a timeout, recording statistics.
    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        self.ensure_connected()?;

        let id = self.next_request_id();
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            self.transport.request(id.clone(), method, params),
        )
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                self.transport.cancel(&id).await;
                warn!(server = %self.name, method, timeout = ?timeout, "Request timed out");
                Err(McpError::Timeout(timeout))
            }
        };

        if let Err(e) = &result {
            if e.is_connection_lost() {
                warn!(server = %self.name, error = %e, "Connection lost");
                self.set_state(ConnectionState::Error);
            }
        }

        self.record(started.elapsed(), result.as_ref().err().map(ToString::to_string));
        result
    }

    async fn call<P, R>(&self, method: &str, params: Option<P>) -> Result<R, McpError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = params.map(serde_json::to_value).transpose()?;
        let value = self.execute(method, params, self.options.timeout).await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("invalid {} result: {}", method, e)))
    }

    fn record(&self, latency: Duration, error: Option<String>) {
        if let Some(stats) = self.stats.lock().as_mut() {
            stats.record(latency, error);
        }
    }

    /// Perform the MCP handshake and send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        debug!(server = %self.name, "Initializing MCP session");

        let result: InitializeResult = self
            .call(methods::INITIALIZE, Some(InitializeParams::default()))
            .await?;
        self.transport.notify(methods::INITIALIZED, None).await?;

        info!(
            server = %self.name,
            server_name = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP session initialized"
        );
        *self.server_info.write() = Some(result.clone());
        Ok(result)
    }

    /// List every tool, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.take().map(|cursor| PaginatedParams { cursor });
            let page: ListToolsResult = self.call(methods::TOOLS_LIST, params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(server = %self.name, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    /// List every resource. Servers without resource support yield nothing.
    pub async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.take().map(|cursor| PaginatedParams { cursor });
            let page: ListResourcesResult =
                match self.call(methods::RESOURCES_LIST, params).await {
                    Ok(page) => page,
                    Err(e) if e.is_method_not_found() => {
                        debug!(server = %self.name, "Server does not support resources");
                        return Ok(Vec::new());
                    }
                    Err(e) => return Err(e),
                };
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(server = %self.name, count = resources.len(), "Listed resources");
        Ok(resources)
    }

    /// Call a tool.
    ///
    /// A result flagged `isError` is returned, not raised; it is logged and
    /// counted as an error.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        debug!(server = %self.name, tool = name, "Calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.call(methods::TOOLS_CALL, Some(params)).await?;

        if result.is_error {
            warn!(server = %self.name, tool = name, "Tool returned error: {}", result.text());
            if let Some(stats) = self.stats.lock().as_mut() {
                stats.errors += 1;
                stats.last_error = Some(format!("tool '{}' returned an error", name));
            }
        }

        Ok(result)
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        debug!(server = %self.name, uri, "Reading resource");
        self.call(
            methods::RESOURCES_READ,
            Some(ReadResourceParams {
                uri: uri.to_string(),
            }),
        )
        .await
    }

    /// Liveness check with the short ping timeout. Returns the round trip.
    pub async fn ping(&self) -> Result<Duration, McpError> {
        let started = Instant::now();
        self.execute(methods::PING, None, self.options.ping_timeout)
            .await?;
        Ok(started.elapsed())
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("transport", &self.transport.kind())
            .field("state", &self.state())
            .finish()
    }
}
