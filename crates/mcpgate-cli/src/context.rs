//! Process-wide state built once at startup.

use std::sync::Arc;

use mcpgate_core::Config;
use mcpgate_mcp::{AdapterOptions, McpAdapter};

/// Everything a command needs, passed explicitly instead of held globally.
pub struct GatewayContext {
    pub config: Config,
    pub adapter: Arc<McpAdapter>,
}

impl GatewayContext {
    /// Build the context without connecting anything.
    pub fn new(config: Config) -> Result<Self, mcpgate_core::Error> {
        let options = AdapterOptions::from_config(&config)?;
        Ok(Self {
            config,
            adapter: Arc::new(McpAdapter::new(options)),
        })
    }

    /// Build the context and initialize the adapter.
    pub async fn start(config: Config) -> Result<Self, mcpgate_core::Error> {
        let ctx = Self::new(config)?;
        let mode = ctx.adapter.initialize().await?;
        tracing::debug!(mode = %mode, "Gateway context ready");
        Ok(ctx)
    }

    /// Disconnect every server.
    pub async fn shutdown(&self) {
        self.adapter.shutdown().await;
    }
}
