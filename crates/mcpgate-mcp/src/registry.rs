//! Bookkeeping for configured servers.
//!
//! The registry never performs I/O. It records which servers exist, which
//! are connected, what they expose and when their state last changed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::client::McpClient;
use crate::config::ServerConfig;
use crate::error::McpError;
use crate::protocol::{Resource, Tool};

/// One registered server.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    /// Server name.
    pub name: String,
    /// Declared configuration.
    pub config: ServerConfig,
    /// Client handle once connected.
    pub client: Option<Arc<McpClient>>,
    /// Whether the server is currently usable.
    pub connected: bool,
    /// When the server last became connected.
    pub last_connected: Option<DateTime<Utc>>,
    /// Why the server is not connected, if it failed.
    pub connection_error: Option<String>,
    /// Tools reported after initialization.
    pub tools: Vec<Tool>,
    /// Resources reported after initialization.
    pub resources: Vec<Resource>,
}

impl ServerEntry {
    fn new(config: ServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            config,
            client: None,
            connected: false,
            last_connected: None,
            connection_error: None,
            tools: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Whether this server advertises `domain`.
    pub fn has_domain(&self, domain: &str) -> bool {
        self.config.domains.contains(domain)
    }

    /// Whether this server exposes a tool named `tool`.
    pub fn has_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t.name == tool)
    }
}

/// Summary line for one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub transport: String,
    pub priority: u32,
    pub critical: bool,
    pub connected: bool,
    pub tools: usize,
    pub resources: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.connected { "up" } else { "down" };
        write!(
            f,
            "{:<4} {} ({}, priority {}{})",
            mark,
            self.name,
            self.transport,
            self.priority,
            if self.critical { ", critical" } else { "" }
        )?;
        if self.connected {
            write!(f, ": {} tools, {} resources", self.tools, self.resources)?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}

/// Central table of configured servers.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: HashMap<String, ServerEntry>,
}

fn by_priority(a: &&ServerEntry, b: &&ServerEntry) -> std::cmp::Ordering {
    a.config
        .priority
        .cmp(&b.config.priority)
        .then_with(|| a.name.cmp(&b.name))
}

impl ServerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server in the disconnected state.
    pub fn register(&mut self, config: ServerConfig) -> Result<(), McpError> {
        if self.servers.contains_key(&config.name) {
            return Err(McpError::ServerAlreadyExists(config.name));
        }
        debug!(server = %config.name, transport = %config.transport, "Registered server");
        self.servers
            .insert(config.name.clone(), ServerEntry::new(config));
        Ok(())
    }

    /// Record a successful connection.
    pub fn mark_connected(&mut self, name: &str, client: Arc<McpClient>) -> Result<(), McpError> {
        let entry = self.entry_mut(name)?;
        entry.client = Some(client);
        entry.connected = true;
        entry.last_connected = Some(Utc::now());
        entry.connection_error = None;
        Ok(())
    }

    /// Record a disconnection, optionally with the reason.
    pub fn mark_disconnected(&mut self, name: &str, error: Option<String>) -> Result<(), McpError> {
        let entry = self.entry_mut(name)?;
        entry.client = None;
        entry.connected = false;
        entry.connection_error = error;
        Ok(())
    }

    /// Cache what a server exposes.
    pub fn set_capabilities(
        &mut self,
        name: &str,
        tools: Vec<Tool>,
        resources: Vec<Resource>,
    ) -> Result<(), McpError> {
        let entry = self.entry_mut(name)?;
        entry.tools = tools;
        entry.resources = resources;
        Ok(())
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut ServerEntry, McpError> {
        self.servers
            .get_mut(name)
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))
    }

    /// Look up a server.
    pub fn get(&self, name: &str) -> Option<&ServerEntry> {
        self.servers.get(name)
    }

    /// Client for a connected server.
    pub fn client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.servers
            .get(name)
            .filter(|entry| entry.connected)
            .and_then(|entry| entry.client.clone())
    }

    /// All servers, ordered by priority then name.
    pub fn servers(&self) -> Vec<&ServerEntry> {
        let mut servers: Vec<&ServerEntry> = self.servers.values().collect();
        servers.sort_by(by_priority);
        servers
    }

    /// Servers advertising `domain`, ordered by priority.
    pub fn get_servers_by_domain(&self, domain: &str) -> Vec<&ServerEntry> {
        let mut servers: Vec<&ServerEntry> = self
            .servers
            .values()
            .filter(|entry| entry.has_domain(domain))
            .collect();
        servers.sort_by(by_priority);
        servers
    }

    /// The preferred server for `capability`: a domain tag or a tool name.
    ///
    /// Lowest priority wins; ties go to the alphabetically first name.
    pub fn get_server_by_capability(&self, capability: &str) -> Option<&ServerEntry> {
        self.servers
            .values()
            .filter(|entry| entry.has_domain(capability) || entry.has_tool(capability))
            .min_by(|a, b| by_priority(a, b))
    }

    /// Connected servers, ordered by priority.
    pub fn get_connected_servers(&self) -> Vec<&ServerEntry> {
        let mut servers: Vec<&ServerEntry> =
            self.servers.values().filter(|entry| entry.connected).collect();
        servers.sort_by(by_priority);
        servers
    }

    /// Names of connected servers, ordered by priority.
    pub fn connected_names(&self) -> Vec<String> {
        self.get_connected_servers()
            .into_iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Per-server summary, ordered by priority.
    pub fn status_report(&self) -> Vec<ServerStatus> {
        self.servers()
            .into_iter()
            .map(|entry| ServerStatus {
                name: entry.name.clone(),
                transport: entry.config.transport.to_string(),
                priority: entry.config.priority,
                critical: entry.config.critical,
                connected: entry.connected,
                tools: entry.tools.len(),
                resources: entry.resources.len(),
                error: entry.connection_error.clone(),
            })
            .collect()
    }

    /// Number of registered servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether no servers are registered.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Remove every entry, returning the clients that were connected.
    pub fn clear(&mut self) -> Vec<Arc<McpClient>> {
        self.servers
            .drain()
            .filter_map(|(_, entry)| entry.client)
            .collect()
    }
}
