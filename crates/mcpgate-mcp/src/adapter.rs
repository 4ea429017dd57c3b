//! The backend handed to callers: one server or many behind one surface.
//!
//! The adapter decides once, at startup, whether to aggregate the servers
//! file or wrap the single configured server. When aggregation fails and
//! fallback is enabled, it falls back to the single server.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mcpgate_core::config::{AdapterMode, Config, ValidationResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::aggregator::{Aggregator, ServerHealth, SkippedServer};
use crate::client::McpClient;
use crate::config::{has_servers, ConfigLoader, ServerConfig, ServerDefaults, TransportKind};
use crate::error::{AdapterError, ConfigError, McpError};
use crate::factory::{ClientFactory, TransportClientFactory};
use crate::protocol::{CallToolResult, ReadResourceResult, Resource, Tool};
use crate::registry::ServerStatus;

/// Lifecycle of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterState {
    Uninitialized,
    Initializing,
    Ready,
    Shutdown,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The backend shape actually running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveMode {
    Single,
    Multi,
}

impl fmt::Display for ActiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

/// Resolve the configured mode against the servers file.
///
/// `Auto` picks multi-server mode only when the file exists, parses and lists
/// at least one server. Reachability is never probed.
pub fn detect_mode(configured: AdapterMode, servers_config: &Path) -> ActiveMode {
    match configured {
        AdapterMode::Single => ActiveMode::Single,
        AdapterMode::Multi => ActiveMode::Multi,
        AdapterMode::Auto if has_servers(servers_config) => ActiveMode::Multi,
        AdapterMode::Auto => ActiveMode::Single,
    }
}

/// Counts describing a running backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendSummary {
    pub servers: Vec<ServerStatus>,
    pub servers_connected: usize,
    pub servers_skipped: Vec<SkippedServer>,
    pub tools: usize,
    pub resources: usize,
}

/// Operations both backend shapes provide.
#[async_trait]
pub trait McpBackend: Send + Sync {
    /// Which shape this is.
    fn mode(&self) -> ActiveMode;

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError>;

    async fn list_resources(&self) -> Result<Vec<Resource>, McpError>;

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError>;

    async fn get_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError>;

    /// Ping every server behind this backend.
    async fn health(&self) -> Vec<ServerHealth>;

    fn summary(&self) -> BackendSummary;

    /// Disconnect everything.
    async fn shutdown(&self);
}

/// One server, names passed through unchanged.
pub struct SingleServerBackend {
    client: Arc<McpClient>,
    priority: u32,
    tools: AtomicUsize,
    resources: AtomicUsize,
}

impl SingleServerBackend {
    /// Connect and initialize `client` within `timeout`.
    pub async fn start(
        client: McpClient,
        priority: u32,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let client = Arc::new(client);
        let result = tokio::time::timeout(timeout, async {
            client.connect().await?;
            client.initialize().await
        })
        .await
        .unwrap_or(Err(McpError::Timeout(timeout)));

        if let Err(e) = result {
            let _ = client.disconnect().await;
            return Err(e);
        }

        let backend = Self {
            client,
            priority,
            tools: AtomicUsize::new(0),
            resources: AtomicUsize::new(0),
        };
        // Prime the counts; a server without tools or resources is still usable.
        if let Err(e) = McpBackend::list_tools(&backend).await {
            warn!(server = %backend.client.name(), error = %e, "Could not list tools");
        }
        if let Err(e) = McpBackend::list_resources(&backend).await {
            warn!(server = %backend.client.name(), error = %e, "Could not list resources");
        }
        Ok(backend)
    }

    /// The wrapped client.
    pub fn client(&self) -> &Arc<McpClient> {
        &self.client
    }
}

#[async_trait]
impl McpBackend for SingleServerBackend {
    fn mode(&self) -> ActiveMode {
        ActiveMode::Single
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let tools = self.client.list_tools().await?;
        self.tools.store(tools.len(), Ordering::Relaxed);
        Ok(tools)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        let resources = self.client.list_resources().await?;
        self.resources.store(resources.len(), Ordering::Relaxed);
        Ok(resources)
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        self.client.call_tool(name, arguments).await
    }

    async fn get_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.client.read_resource(uri).await
    }

    async fn health(&self) -> Vec<ServerHealth> {
        let name = self.client.name().to_string();
        let health = match self.client.ping().await {
            Ok(latency) => ServerHealth {
                name,
                healthy: true,
                latency_ms: Some(latency.as_secs_f64() * 1000.0),
                error: None,
            },
            Err(e) => ServerHealth {
                name,
                healthy: false,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        };
        vec![health]
    }

    fn summary(&self) -> BackendSummary {
        let connected = self.client.is_connected();
        let tools = self.tools.load(Ordering::Relaxed);
        let resources = self.resources.load(Ordering::Relaxed);
        let status = ServerStatus {
            name: self.client.name().to_string(),
            transport: self.client.transport_kind().to_string(),
            priority: self.priority,
            critical: true,
            connected,
            tools,
            resources,
            error: if connected {
                None
            } else {
                self.client.stats().and_then(|s| s.last_error)
            },
        };

        BackendSummary {
            servers: vec![status],
            servers_connected: usize::from(connected),
            servers_skipped: Vec::new(),
            tools,
            resources,
        }
    }

    async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!(server = %self.client.name(), error = %e, "Disconnect failed");
        }
    }
}

#[async_trait]
impl McpBackend for Aggregator {
    fn mode(&self) -> ActiveMode {
        ActiveMode::Multi
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        Ok(Aggregator::list_tools(self))
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        Ok(Aggregator::list_resources(self))
    }

    async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        self.call_tool(name, arguments).await
    }

    async fn get_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.read_resource(uri).await
    }

    async fn health(&self) -> Vec<ServerHealth> {
        Aggregator::health(self).await
    }

    fn summary(&self) -> BackendSummary {
        BackendSummary {
            servers: self.status_report(),
            servers_connected: self.connected_servers().len(),
            servers_skipped: self.skipped(),
            tools: self.tools().len(),
            resources: self.resources().len(),
        }
    }

    async fn shutdown(&self) {
        Aggregator::shutdown(self).await
    }
}

/// Settings the adapter runs with.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub mode: AdapterMode,
    pub fallback_enabled: bool,
    pub servers_config: PathBuf,
    pub init_timeout: Duration,
    pub strict_env: bool,
    /// Backend for single-server mode and fallback.
    pub single_server: ServerConfig,
}

impl AdapterOptions {
    /// Build options from gateway settings.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let single = &config.single_server;
        let transport: TransportKind = single.transport.parse().map_err(|reason: String| {
            let mut result = ValidationResult::new();
            result.add_error("single_server.transport", reason);
            ConfigError::Validation(result.issues)
        })?;

        let mut server = match transport {
            TransportKind::Stdio => ServerConfig::stdio(&single.name, ""),
            TransportKind::Sse => ServerConfig::sse(&single.name, ""),
            TransportKind::Http => ServerConfig::http(&single.name, ""),
        };
        server.command = single.command.clone();
        server.args = single.args.clone();
        server.env = single.env.clone();
        server.cwd = single.cwd.clone();
        server.url = single.url.clone();
        server.headers = single.headers.clone();
        server.timeout = Some(single.timeout_secs);
        server.retry_attempts = Some(single.retry_attempts);
        server.critical = true;

        Ok(Self {
            mode: config.adapter.mode,
            fallback_enabled: config.adapter.fallback_enabled,
            servers_config: config.adapter.servers_config.clone(),
            init_timeout: Duration::from_secs(config.adapter.init_timeout_secs),
            strict_env: config.adapter.strict_env,
            single_server: server,
        })
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    requests: u64,
    errors: u64,
    total_latency: Duration,
}

impl CallCounters {
    fn record(&mut self, latency: Duration, failed: bool) {
        self.requests += 1;
        self.total_latency += latency;
        if failed {
            self.errors += 1;
        }
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.total_latency.as_secs_f64() * 1000.0 / self.requests as f64
    }
}

/// Adapter-level counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeStats {
    pub state: AdapterState,
    pub mode: Option<ActiveMode>,
    pub requests: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    pub servers: Vec<ServerStatus>,
    pub servers_connected: usize,
    pub servers_skipped: Vec<SkippedServer>,
    pub tools: usize,
    pub resources: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Result of [`McpAdapter::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    /// Ready and at least one server answered.
    pub healthy: bool,
    pub state: AdapterState,
    pub mode: Option<ActiveMode>,
    pub servers: Vec<ServerHealth>,
}

/// Single entry point for callers of the MCP backend.
pub struct McpAdapter {
    options: AdapterOptions,
    factory: Arc<dyn ClientFactory>,
    state: RwLock<AdapterState>,
    backend: RwLock<Option<Arc<dyn McpBackend>>>,
    fallback_reason: RwLock<Option<String>>,
    counters: Mutex<CallCounters>,
}

impl McpAdapter {
    /// Adapter over the real transports.
    pub fn new(options: AdapterOptions) -> Self {
        Self::with_factory(options, Arc::new(TransportClientFactory))
    }

    /// Adapter building clients through `factory`.
    pub fn with_factory(options: AdapterOptions, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            options,
            factory,
            state: RwLock::new(AdapterState::Uninitialized),
            backend: RwLock::new(None),
            fallback_reason: RwLock::new(None),
            counters: Mutex::new(CallCounters::default()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    /// Running backend shape, once ready.
    pub fn mode(&self) -> Option<ActiveMode> {
        self.backend.read().as_ref().map(|b| b.mode())
    }

    /// Mode `initialize` would pick right now.
    pub fn detect_mode(&self) -> ActiveMode {
        detect_mode(self.options.mode, &self.options.servers_config)
    }

    /// Why multi-server mode was abandoned, if it was.
    pub fn fallback_reason(&self) -> Option<String> {
        self.fallback_reason.read().clone()
    }

    /// Bring the backend up. Calling again once ready is a no-op.
    pub async fn initialize(&self) -> Result<ActiveMode, AdapterError> {
        {
            let mut state = self.state.write();
            match *state {
                AdapterState::Ready => {
                    if let Some(mode) = self.mode() {
                        return Ok(mode);
                    }
                }
                AdapterState::Initializing => {
                    return Err(AdapterError::NotInitialized(AdapterState::Initializing));
                }
                _ => {}
            }
            *state = AdapterState::Initializing;
        }

        let mode = self.detect_mode();
        info!(configured = %self.options.mode, mode = %mode, "Initializing MCP adapter");

        let result = match mode {
            ActiveMode::Multi => self.init_multi().await,
            ActiveMode::Single => self.init_single().await.map_err(AdapterError::SingleServer),
        };

        match result {
            Ok(backend) => {
                let mode = backend.mode();
                *self.backend.write() = Some(backend);
                *self.state.write() = AdapterState::Ready;
                info!(mode = %mode, "MCP adapter ready");
                Ok(mode)
            }
            Err(e) => {
                *self.state.write() = AdapterState::Uninitialized;
                error!(error = %e, "MCP adapter initialization failed");
                Err(e)
            }
        }
    }

    async fn init_multi(&self) -> Result<Arc<dyn McpBackend>, AdapterError> {
        let model = ConfigLoader::new(self.options.strict_env).load(&self.options.servers_config)?;
        let aggregator = Aggregator::new(model, Arc::clone(&self.factory), self.options.init_timeout);

        match aggregator.initialize().await {
            Ok(_) => Ok(Arc::new(aggregator)),
            Err(e) if self.options.fallback_enabled => {
                warn!(error = %e, "Multi-server initialization failed, falling back to single server");
                *self.fallback_reason.write() = Some(e.to_string());
                self.init_single()
                    .await
                    .map_err(|fallback| AdapterError::FallbackFailed {
                        multi: e.to_string(),
                        fallback: fallback.to_string(),
                    })
            }
            Err(e) => Err(e),
        }
    }

    async fn init_single(&self) -> Result<Arc<dyn McpBackend>, McpError> {
        let client = self
            .factory
            .create(&self.options.single_server, &ServerDefaults::default())?;
        let backend = SingleServerBackend::start(
            client,
            self.options.single_server.priority,
            self.options.init_timeout,
        )
        .await?;
        Ok(Arc::new(backend))
    }

    fn ready_backend(&self) -> Result<Arc<dyn McpBackend>, AdapterError> {
        let state = self.state();
        if state != AdapterState::Ready {
            return Err(AdapterError::NotInitialized(state));
        }
        self.backend
            .read()
            .clone()
            .ok_or(AdapterError::NotInitialized(state))
    }

    /// Record the call and apply the fallback policy to a failure.
    fn settle<T>(
        &self,
        operation: &str,
        started: Instant,
        result: Result<T, McpError>,
        empty: impl FnOnce(&McpError) -> T,
    ) -> Result<T, AdapterError> {
        self.counters
            .lock()
            .record(started.elapsed(), result.is_err());

        match result {
            Ok(value) => Ok(value),
            Err(e) if self.options.fallback_enabled => {
                warn!(operation, error = %e, "MCP call failed, returning empty result");
                Ok(empty(&e))
            }
            Err(e) => Err(AdapterError::Backend(e)),
        }
    }

    /// Every tool the backend exposes.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, AdapterError> {
        let backend = self.ready_backend()?;
        let started = Instant::now();
        let result = backend.list_tools().await;
        self.settle("list_tools", started, result, |_| Vec::new())
    }

    /// Every resource the backend exposes.
    pub async fn list_resources(&self) -> Result<Vec<Resource>, AdapterError> {
        let backend = self.ready_backend()?;
        let started = Instant::now();
        let result = backend.list_resources().await;
        self.settle("list_resources", started, result, |_| Vec::new())
    }

    /// Call a tool. With fallback enabled a failure comes back as an error
    /// result instead of an `Err`.
    pub async fn execute_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, AdapterError> {
        let backend = self.ready_backend()?;
        let started = Instant::now();
        let result = backend.execute_tool(name, arguments).await;
        self.settle("execute_tool", started, result, |e| {
            CallToolResult::error_text(format!("tool '{}' failed: {}", name, e))
        })
    }

    /// Read a resource.
    pub async fn get_resource(&self, uri: &str) -> Result<ReadResourceResult, AdapterError> {
        let backend = self.ready_backend()?;
        let started = Instant::now();
        let result = backend.get_resource(uri).await;
        self.settle("get_resource", started, result, |_| ReadResourceResult::default())
    }

    /// Counters and backend shape. Available in every state.
    pub fn get_stats(&self) -> RuntimeStats {
        let summary = self
            .backend
            .read()
            .as_ref()
            .map(|b| b.summary())
            .unwrap_or_default();
        let counters = self.counters.lock();

        RuntimeStats {
            state: self.state(),
            mode: self.mode(),
            requests: counters.requests,
            errors: counters.errors,
            avg_latency_ms: counters.avg_latency_ms(),
            servers: summary.servers,
            servers_connected: summary.servers_connected,
            servers_skipped: summary.servers_skipped,
            tools: summary.tools,
            resources: summary.resources,
            fallback_reason: self.fallback_reason(),
        }
    }

    /// Ping every server. Reports unhealthy rather than failing when not ready.
    pub async fn health_check(&self) -> HealthStatus {
        let state = self.state();
        let Ok(backend) = self.ready_backend() else {
            return HealthStatus {
                healthy: false,
                state,
                mode: None,
                servers: Vec::new(),
            };
        };

        let servers = backend.health().await;
        HealthStatus {
            healthy: servers.iter().any(|s| s.healthy),
            state,
            mode: Some(backend.mode()),
            servers,
        }
    }

    /// Disconnect the backend. Further calls fail with `NotInitialized`.
    pub async fn shutdown(&self) {
        let backend = self.backend.write().take();
        *self.state.write() = AdapterState::Shutdown;
        if let Some(backend) = backend {
            info!(mode = %backend.mode(), "Shutting down MCP adapter");
            backend.shutdown().await;
        }
    }
}

impl fmt::Debug for McpAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpAdapter")
            .field("state", &self.state())
            .field("mode", &self.mode())
            .field("options", &self.options)
            .finish()
    }
}
