//! One logical MCP backend over many servers.
//!
//! Every enabled server is brought up concurrently under its own time budget.
//! Non-critical failures leave the server out of the aggregate; a critical
//! failure aborts the whole initialization. Tools and resources are exposed
//! under `server.name` keys so identical names on different servers never
//! collide.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::McpClient;
use crate::config::{ConfigurationModel, ServerConfig, ServerDefaults};
use crate::error::{AdapterError, McpError};
use crate::factory::ClientFactory;
use crate::protocol::{CallToolResult, ReadResourceResult, Resource, Tool};
use crate::registry::{ServerRegistry, ServerStatus};

/// Separator between server name and tool or resource name.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Build the aggregated key for `item` on `server`.
pub fn namespaced(server: &str, item: &str) -> String {
    format!("{}{}{}", server, NAMESPACE_SEPARATOR, item)
}

/// A tool exposed by one server.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTool {
    /// `server.tool`
    pub key: String,
    /// Owning server.
    pub server: String,
    /// The tool as the server reported it.
    pub tool: Tool,
}

impl AggregatedTool {
    /// The tool renamed to its aggregated key.
    pub fn namespaced_tool(&self) -> Tool {
        Tool {
            name: self.key.clone(),
            ..self.tool.clone()
        }
    }
}

/// A resource exposed by one server.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResource {
    /// `server.uri`
    pub key: String,
    /// Owning server.
    pub server: String,
    /// The resource as the server reported it.
    pub resource: Resource,
}

impl AggregatedResource {
    /// The resource named by its aggregated key. The URI is left as the server
    /// reported it.
    pub fn namespaced_resource(&self) -> Resource {
        Resource {
            name: self.key.clone(),
            ..self.resource.clone()
        }
    }
}

/// A server left out of the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedServer {
    pub name: String,
    pub reason: String,
    pub critical: bool,
}

/// Liveness of one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerHealth {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Why a single server could not be brought up.
#[derive(Debug)]
pub enum InitError {
    /// The client could not be built from configuration.
    Create(McpError),
    /// The transport never connected.
    Connect(McpError),
    /// The MCP handshake or capability listing failed.
    Handshake(McpError),
    /// The whole bring-up exceeded its budget.
    Timeout(Duration),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(e) => write!(f, "invalid server configuration: {}", e),
            Self::Connect(e) => write!(f, "connection failed: {}", e),
            Self::Handshake(e) => write!(f, "initialization failed: {}", e),
            Self::Timeout(d) => write!(f, "initialization timed out after {:?}", d),
        }
    }
}

/// A server that finished initialization.
struct ReadyServer {
    client: Arc<McpClient>,
    tools: Vec<Tool>,
    resources: Vec<Resource>,
}

/// Outcome of a successful [`Aggregator::initialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct InitSummary {
    pub connected: Vec<String>,
    pub skipped: Vec<SkippedServer>,
    pub tools: usize,
    pub resources: usize,
}

/// Aggregates every configured server into one backend.
pub struct Aggregator {
    model: ConfigurationModel,
    factory: Arc<dyn ClientFactory>,
    init_timeout: Duration,
    registry: RwLock<ServerRegistry>,
    tools: RwLock<BTreeMap<String, AggregatedTool>>,
    resources: RwLock<BTreeMap<String, AggregatedResource>>,
    skipped: RwLock<Vec<SkippedServer>>,
}

impl Aggregator {
    /// Create an aggregator over `model`. Nothing connects until `initialize`.
    pub fn new(
        model: ConfigurationModel,
        factory: Arc<dyn ClientFactory>,
        init_timeout: Duration,
    ) -> Self {
        Self {
            model,
            factory,
            init_timeout,
            registry: RwLock::new(ServerRegistry::new()),
            tools: RwLock::new(BTreeMap::new()),
            resources: RwLock::new(BTreeMap::new()),
            skipped: RwLock::new(Vec::new()),
        }
    }

    /// Bring up every enabled server concurrently.
    ///
    /// Fails if a critical server fails or nothing connects. On failure every
    /// server that did connect is disconnected again.
    pub async fn initialize(&self) -> Result<InitSummary, AdapterError> {
        let servers: Vec<ServerConfig> = self.model.enabled_servers().cloned().collect();
        {
            let mut registry = self.registry.write();
            let registered = servers
                .iter()
                .try_for_each(|server| registry.register(server.clone()));
            if let Err(e) = registered {
                registry.clear();
                return Err(e.into());
            }
        }

        info!(
            servers = servers.len(),
            timeout = ?self.init_timeout,
            "Initializing MCP servers"
        );

        let defaults = &self.model.defaults;
        let outcomes = join_all(servers.iter().map(|server| async move {
            let result = self.init_server(server, defaults).await;
            (server, result)
        }))
        .await;

        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        for (server, result) in outcomes {
            match result {
                Ok(server_ready) => ready.push((server.name.clone(), server_ready)),
                Err(e) => {
                    warn!(server = %server.name, critical = server.critical, error = %e, "Skipping MCP server");
                    skipped.push(SkippedServer {
                        name: server.name.clone(),
                        reason: e.to_string(),
                        critical: server.critical,
                    });
                }
            }
        }

        if let Some(critical) = skipped.iter().find(|s| s.critical).cloned() {
            disconnect_all(ready.into_iter().map(|(_, r)| r.client)).await;
            self.registry.write().clear();
            return Err(AdapterError::CriticalServerFailed {
                server: critical.name,
                reason: critical.reason,
            });
        }

        if ready.is_empty() {
            self.registry.write().clear();
            return Err(AdapterError::NoServersAvailable {
                skipped: skipped.into_iter().map(|s| s.name).collect(),
            });
        }

        {
            let mut registry = self.registry.write();
            for (name, server) in ready {
                registry.mark_connected(&name, server.client)?;
                registry.set_capabilities(&name, server.tools, server.resources)?;
            }
            for server in &skipped {
                registry.mark_disconnected(&server.name, Some(server.reason.clone()))?;
            }
        }
        *self.skipped.write() = skipped.clone();
        self.rebuild_maps();

        let summary = InitSummary {
            connected: self.registry.read().connected_names(),
            skipped,
            tools: self.tools.read().len(),
            resources: self.resources.read().len(),
        };
        info!(
            connected = summary.connected.len(),
            skipped = summary.skipped.len(),
            tools = summary.tools,
            resources = summary.resources,
            "MCP servers initialized"
        );
        Ok(summary)
    }

    async fn init_server(
        &self,
        server: &ServerConfig,
        defaults: &ServerDefaults,
    ) -> Result<ReadyServer, InitError> {
        let client = Arc::new(
            self.factory
                .create(server, defaults)
                .map_err(InitError::Create)?,
        );

        let result = tokio::time::timeout(self.init_timeout, bring_up(&client)).await;
        match result {
            Ok(Ok((tools, resources))) => {
                debug!(
                    server = %server.name,
                    tools = tools.len(),
                    resources = resources.len(),
                    "Server ready"
                );
                Ok(ReadyServer {
                    client,
                    tools,
                    resources,
                })
            }
            Ok(Err(e)) => {
                let _ = client.disconnect().await;
                Err(e)
            }
            Err(_) => {
                let _ = client.disconnect().await;
                Err(InitError::Timeout(self.init_timeout))
            }
        }
    }

    /// Recompute the namespaced maps from connected servers.
    fn rebuild_maps(&self) {
        let registry = self.registry.read();
        let mut tools = BTreeMap::new();
        let mut resources = BTreeMap::new();

        for entry in registry.get_connected_servers() {
            for tool in &entry.tools {
                let key = namespaced(&entry.name, &tool.name);
                tools.insert(
                    key.clone(),
                    AggregatedTool {
                        key,
                        server: entry.name.clone(),
                        tool: tool.clone(),
                    },
                );
            }
            for resource in &entry.resources {
                let key = namespaced(&entry.name, &resource.uri);
                resources.insert(
                    key.clone(),
                    AggregatedResource {
                        key,
                        server: entry.name.clone(),
                        resource: resource.clone(),
                    },
                );
            }
        }

        *self.tools.write() = tools;
        *self.resources.write() = resources;
    }

    /// Aggregated tools keyed `server.tool`.
    pub fn tools(&self) -> BTreeMap<String, AggregatedTool> {
        self.tools.read().clone()
    }

    /// Aggregated resources keyed `server.uri`.
    pub fn resources(&self) -> BTreeMap<String, AggregatedResource> {
        self.resources.read().clone()
    }

    /// All tools, renamed to their aggregated keys.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools
            .read()
            .values()
            .map(AggregatedTool::namespaced_tool)
            .collect()
    }

    /// All resources, named by their aggregated keys.
    ///
    /// Each `name` is accepted by [`Aggregator::read_resource`] and addresses
    /// exactly one server, even when several servers share a URI.
    pub fn list_resources(&self) -> Vec<Resource> {
        self.resources
            .read()
            .values()
            .map(AggregatedResource::namespaced_resource)
            .collect()
    }

    /// Servers left out during initialization.
    pub fn skipped(&self) -> Vec<SkippedServer> {
        self.skipped.read().clone()
    }

    /// Names of connected servers, ordered by priority.
    pub fn connected_servers(&self) -> Vec<String> {
        self.registry.read().connected_names()
    }

    /// Per-server summary lines.
    pub fn status_report(&self) -> Vec<ServerStatus> {
        self.registry.read().status_report()
    }

    /// Resolve a tool reference to its owning server and raw name.
    ///
    /// Accepts a `server.tool` key or a raw name exposed by exactly one server.
    pub fn resolve_tool(&self, name: &str) -> Result<(String, String), McpError> {
        let tools = self.tools.read();
        if let Some(tool) = tools.get(name) {
            return Ok((tool.server.clone(), tool.tool.name.clone()));
        }

        let candidates: Vec<&AggregatedTool> =
            tools.values().filter(|t| t.tool.name == name).collect();
        match candidates.as_slice() {
            [] => Err(McpError::ToolNotFound(name.to_string())),
            [only] => Ok((only.server.clone(), only.tool.name.clone())),
            many => Err(McpError::AmbiguousTool {
                name: name.to_string(),
                candidates: many.iter().map(|t| t.key.clone()).collect(),
            }),
        }
    }

    /// Resolve a resource reference to its owning server and raw URI.
    ///
    /// The first connected server by priority wins when a raw URI is shared.
    pub fn resolve_resource(&self, uri: &str) -> Result<(String, String), McpError> {
        let resources = self.resources.read();
        if let Some(resource) = resources.get(uri) {
            return Ok((resource.server.clone(), resource.resource.uri.clone()));
        }

        let owners: Vec<&str> = resources
            .values()
            .filter(|r| r.resource.uri == uri)
            .map(|r| r.server.as_str())
            .collect();
        if owners.is_empty() {
            return Err(McpError::ResourceNotFound(uri.to_string()));
        }

        let registry = self.registry.read();
        registry
            .get_connected_servers()
            .into_iter()
            .find(|entry| owners.contains(&entry.name.as_str()))
            .map(|entry| (entry.name.clone(), uri.to_string()))
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))
    }

    fn client(&self, server: &str) -> Result<Arc<McpClient>, McpError> {
        self.registry
            .read()
            .client(server)
            .ok_or_else(|| McpError::ServerNotFound(server.to_string()))
    }

    /// Call a tool on whichever server owns it.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        let (server, tool) = self.resolve_tool(name)?;
        let client = self.client(&server)?;
        debug!(server = %server, tool = %tool, "Routing tool call");

        let result = client.call_tool(&tool, arguments).await;
        if let Err(e) = &result {
            self.note_failure(&client, e).await;
        }
        result
    }

    /// Read a resource from whichever server owns it.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        let (server, raw) = self.resolve_resource(uri)?;
        let client = self.client(&server)?;

        let result = client.read_resource(&raw).await;
        if let Err(e) = &result {
            self.note_failure(&client, e).await;
        }
        result
    }

    /// Drop a server from the aggregate once its connection is gone.
    async fn note_failure(&self, client: &McpClient, error: &McpError) {
        if !error.is_connection_lost() {
            return;
        }
        let server = client.name();
        warn!(server = %server, error = %error, "Lost connection to MCP server");
        let dropped = self
            .registry
            .write()
            .mark_disconnected(server, Some(error.to_string()))
            .is_ok();
        if dropped {
            self.rebuild_maps();
        }
        let _ = client.disconnect().await;
    }

    /// Re-fetch tool and resource lists from connected servers.
    pub async fn refresh(&self) {
        let clients: Vec<Arc<McpClient>> = {
            let registry = self.registry.read();
            registry
                .get_connected_servers()
                .into_iter()
                .filter_map(|entry| entry.client.clone())
                .collect()
        };

        let listings = join_all(clients.iter().map(|client| async move {
            let listing = async {
                let tools = client.list_tools().await?;
                let resources = client.list_resources().await?;
                Ok::<_, McpError>((tools, resources))
            }
            .await;
            (Arc::clone(client), listing)
        }))
        .await;

        let mut lost = Vec::new();
        {
            let mut registry = self.registry.write();
            for (client, listing) in listings {
                let name = client.name();
                match listing {
                    Ok((tools, resources)) => {
                        let _ = registry.set_capabilities(name, tools, resources);
                    }
                    Err(e) if e.is_connection_lost() => {
                        warn!(server = %name, error = %e, "Server went away during refresh");
                        let _ = registry.mark_disconnected(name, Some(e.to_string()));
                        lost.push(Arc::clone(&client));
                    }
                    Err(e) => {
                        warn!(server = %name, error = %e, "Refresh failed, keeping cached lists");
                    }
                }
            }
        }
        self.rebuild_maps();
        disconnect_all(lost).await;
    }

    /// Ping every connected server and report skipped ones as unhealthy.
    pub async fn health(&self) -> Vec<ServerHealth> {
        let clients: Vec<Arc<McpClient>> = {
            let registry = self.registry.read();
            registry
                .get_connected_servers()
                .into_iter()
                .filter_map(|entry| entry.client.clone())
                .collect()
        };

        let mut report: Vec<ServerHealth> = join_all(clients.iter().map(|client| async move {
            match client.ping().await {
                Ok(latency) => ServerHealth {
                    name: client.name().to_string(),
                    healthy: true,
                    latency_ms: Some(latency.as_secs_f64() * 1000.0),
                    error: None,
                },
                Err(e) => ServerHealth {
                    name: client.name().to_string(),
                    healthy: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                },
            }
        }))
        .await;

        report.extend(self.skipped.read().iter().map(|s| ServerHealth {
            name: s.name.clone(),
            healthy: false,
            latency_ms: None,
            error: Some(s.reason.clone()),
        }));
        report
    }

    /// Disconnect every server and forget all state.
    pub async fn shutdown(&self) {
        let clients = self.registry.write().clear();
        info!(servers = clients.len(), "Shutting down MCP servers");
        disconnect_all(clients).await;
        self.tools.write().clear();
        self.resources.write().clear();
    }
}

async fn bring_up(client: &McpClient) -> Result<(Vec<Tool>, Vec<Resource>), InitError> {
    client.connect().await.map_err(InitError::Connect)?;
    client.initialize().await.map_err(InitError::Handshake)?;
    let tools = client.list_tools().await.map_err(InitError::Handshake)?;
    let resources = client.list_resources().await.map_err(InitError::Handshake)?;
    Ok((tools, resources))
}

async fn disconnect_all(clients: impl IntoIterator<Item = Arc<McpClient>>) {
    join_all(clients.into_iter().map(|client| async move {
        if let Err(e) = client.disconnect().await {
            warn!(server = %client.name(), error = %e, "Disconnect failed");
        }
    }))
    .await;
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("servers", &self.model.servers.len())
            .field("connected", &self.connected_servers())
            .field("tools", &self.tools.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use crate::protocol::methods;
    use crate::testing::{resources, tools, FakeFactory, FakeTransport, ScriptedReply};
    use serde_json::json;

    fn aggregator(servers: Vec<ServerConfig>, factory: FakeFactory) -> Aggregator {
        Aggregator::new(
            ConfigurationModel::with_servers(servers),
            Arc::new(factory),
            Duration::from_secs(2),
        )
    }

    fn db_factory() -> FakeFactory {
        FakeFactory::new()
            .server("postgres", || {
                FakeTransport::new(TransportKind::Stdio)
                    .reply(methods::TOOLS_LIST, tools(&["execute_query", "list_tables"]))
                    .reply(methods::RESOURCES_LIST, resources(&["schema://public"]))
            })
            .server("warehouse", || {
                FakeTransport::new(TransportKind::Sse)
                    .reply(methods::TOOLS_LIST, tools(&["execute_query"]))
                    .reply(methods::RESOURCES_LIST, resources(&["schema://public"]))
            })
    }

    fn db_servers() -> Vec<ServerConfig> {
        vec![
            ServerConfig::stdio("postgres", "mcp-postgres").with_priority(10),
            ServerConfig::sse("warehouse", "http://localhost:9000/sse").with_priority(20),
        ]
    }

    #[tokio::test]
    async fn test_overlapping_tools_are_namespaced() {
        let agg = aggregator(db_servers(), db_factory());
        let summary = agg.initialize().await.unwrap();

        assert_eq!(summary.connected, vec!["postgres", "warehouse"]);
        assert_eq!(summary.tools, 3);
        let keys: Vec<String> = agg.tools().into_keys().collect();
        assert_eq!(
            keys,
            vec![
                "postgres.execute_query",
                "postgres.list_tables",
                "warehouse.execute_query"
            ]
        );
        assert!(agg
            .list_tools()
            .iter()
            .all(|t| t.name.contains(NAMESPACE_SEPARATOR)));
        assert_eq!(agg.resources().len(), 2);
    }

    #[tokio::test]
    async fn test_non_critical_failure_is_skipped() {
        let mut servers = db_servers();
        servers.push(ServerConfig::stdio("broken", "missing-binary"));
        let agg = aggregator(servers, db_factory());

        let summary = agg.initialize().await.unwrap();
        assert_eq!(summary.connected.len(), 2);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].name, "broken");
        assert!(summary.skipped[0].reason.contains("connection failed"));

        let status = agg.status_report();
        let broken = status.iter().find(|s| s.name == "broken").unwrap();
        assert!(!broken.connected);
    }

    #[tokio::test]
    async fn test_critical_failure_aborts_and_disconnects() {
        let postgres = FakeTransport::new(TransportKind::Stdio);
        let disconnects = postgres.disconnect_calls();
        let slot = parking_lot::Mutex::new(Some(postgres));
        let factory = FakeFactory::new().server("postgres", move || {
            slot.lock()
                .take()
                .unwrap_or_else(|| FakeTransport::new(TransportKind::Stdio))
        });

        let servers = vec![
            ServerConfig::stdio("postgres", "mcp-postgres"),
            ServerConfig::stdio("auth", "mcp-auth").with_critical(true),
        ];
        let agg = aggregator(servers, factory);

        let err = agg.initialize().await.unwrap_err();
        assert!(matches!(err, AdapterError::CriticalServerFailed { ref server, .. } if server == "auth"));
        assert!(disconnects.load(std::sync::atomic::Ordering::SeqCst) >= 1);
        assert!(agg.connected_servers().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_connected() {
        let agg = aggregator(
            vec![ServerConfig::stdio("a", "x"), ServerConfig::stdio("b", "y")],
            FakeFactory::new(),
        );
        match agg.initialize().await.unwrap_err() {
            AdapterError::NoServersAvailable { mut skipped } => {
                skipped.sort();
                assert_eq!(skipped, vec!["a", "b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let factory = db_factory().server("slow", || {
            FakeTransport::new(TransportKind::Http).reply(methods::INITIALIZE, ScriptedReply::Hang)
        });
        let mut servers = db_servers();
        servers.push(ServerConfig::http("slow", "http://localhost:7000/mcp"));
        let agg = Aggregator::new(
            ConfigurationModel::with_servers(servers),
            Arc::new(factory),
            Duration::from_millis(100),
        );

        let summary = agg.initialize().await.unwrap();
        assert_eq!(summary.connected.len(), 2);
        assert!(summary.skipped[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_disabled_servers_are_not_started() {
        let factory = db_factory();
        let created = factory.created();
        let mut servers = db_servers();
        servers[1].enabled = false;
        let agg = aggregator(servers, factory);

        agg.initialize().await.unwrap();
        assert_eq!(*created.lock(), vec!["postgres".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_tool() {
        let agg = aggregator(db_servers(), db_factory());
        agg.initialize().await.unwrap();

        assert_eq!(
            agg.resolve_tool("warehouse.execute_query").unwrap(),
            ("warehouse".to_string(), "execute_query".to_string())
        );
        assert_eq!(
            agg.resolve_tool("list_tables").unwrap(),
            ("postgres".to_string(), "list_tables".to_string())
        );
        match agg.resolve_tool("execute_query").unwrap_err() {
            McpError::AmbiguousTool { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            agg.resolve_tool("drop_database"),
            Err(McpError::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_call_tool_routes_to_owner() {
        let factory = db_factory().server("search", || {
            FakeTransport::new(TransportKind::Http)
                .reply(methods::TOOLS_LIST, tools(&["search"]))
                .reply(
                    methods::TOOLS_CALL,
                    ScriptedReply::Ok(json!({"content": [{"type": "text", "text": "3 hits"}]})),
                )
        });
        let mut servers = db_servers();
        servers.push(ServerConfig::http("search", "http://localhost:7000/mcp"));
        let agg = aggregator(servers, factory);
        agg.initialize().await.unwrap();

        let result = agg.call_tool("search", None).await.unwrap();
        assert_eq!(result.text(), "3 hits");
    }

    #[tokio::test]
    async fn test_resource_shared_uri_prefers_priority() {
        let agg = aggregator(db_servers(), db_factory());
        agg.initialize().await.unwrap();

        assert_eq!(
            agg.resolve_resource("schema://public").unwrap().0,
            "postgres"
        );
        assert_eq!(
            agg.resolve_resource("warehouse.schema://public").unwrap().0,
            "warehouse"
        );
        assert!(agg.read_resource("schema://private").await.is_err());
    }

    #[tokio::test]
    async fn test_shared_uri_listed_once_per_server() {
        let factory = FakeFactory::new()
            .server("postgres", || {
                FakeTransport::new(TransportKind::Stdio)
                    .reply(methods::RESOURCES_LIST, resources(&["schema://public"]))
                    .reply(
                        methods::RESOURCES_READ,
                        ScriptedReply::Ok(json!({"contents": [{"uri": "schema://public", "text": "pg"}]})),
                    )
            })
            .server("warehouse", || {
                FakeTransport::new(TransportKind::Sse)
                    .reply(methods::RESOURCES_LIST, resources(&["schema://public"]))
                    .reply(
                        methods::RESOURCES_READ,
                        ScriptedReply::Ok(json!({"contents": [{"uri": "schema://public", "text": "dw"}]})),
                    )
            });
        let agg = aggregator(db_servers(), factory);
        agg.initialize().await.unwrap();

        let listed = agg.list_resources();
        let names: Vec<&str> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["postgres.schema://public", "warehouse.schema://public"]);
        assert!(listed.iter().all(|r| r.uri == "schema://public"));

        let mut bodies = Vec::new();
        for resource in &listed {
            let read = agg.read_resource(&resource.name).await.unwrap();
            bodies.push(read.contents[0].text.clone().unwrap());
        }
        assert_eq!(bodies, vec!["pg", "dw"]);
    }

    #[tokio::test]
    async fn test_lost_connection_drops_server() {
        let factory = db_factory().server("flaky", || {
            FakeTransport::new(TransportKind::Stdio)
                .reply(methods::TOOLS_LIST, tools(&["flaky_tool"]))
                .reply(methods::TOOLS_CALL, ScriptedReply::Closed)
        });
        let mut servers = db_servers();
        servers.push(ServerConfig::stdio("flaky", "mcp-flaky"));
        let agg = aggregator(servers, factory);
        agg.initialize().await.unwrap();
        assert_eq!(agg.tools().len(), 4);

        assert!(agg.call_tool("flaky_tool", None).await.is_err());
        assert_eq!(agg.tools().len(), 3);
        assert!(!agg.connected_servers().contains(&"flaky".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_tools() {
        let factory = FakeFactory::new().server("postgres", || {
            FakeTransport::new(TransportKind::Stdio)
                .reply(methods::TOOLS_LIST, tools(&["execute_query"]))
                .reply(methods::TOOLS_LIST, tools(&["execute_query", "vacuum"]))
        });
        let agg = aggregator(vec![ServerConfig::stdio("postgres", "x")], factory);
        agg.initialize().await.unwrap();
        assert_eq!(agg.tools().len(), 1);

        agg.refresh().await;
        assert!(agg.tools().contains_key("postgres.vacuum"));
    }

    #[tokio::test]
    async fn test_health_and_shutdown() {
        let mut servers = db_servers();
        servers.push(ServerConfig::stdio("broken", "x"));
        let agg = aggregator(servers, db_factory());
        agg.initialize().await.unwrap();

        let health = agg.health().await;
        assert_eq!(health.len(), 3);
        assert_eq!(health.iter().filter(|h| h.healthy).count(), 2);

        agg.shutdown().await;
        assert!(agg.connected_servers().is_empty());
        assert!(agg.list_tools().is_empty());
    }
}
