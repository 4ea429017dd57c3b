//! # mcpgate-mcp
//!
//! MCP (Model Context Protocol) client and aggregation layer for mcpgate.
//!
//! This crate provides:
//! - JSON-RPC protocol types and SSE framing
//! - stdio, SSE and streamable HTTP transports
//! - A transport-agnostic client with retry, timeouts and statistics
//! - Servers file loading with environment substitution and validation
//! - A registry and aggregator presenting many servers as one backend
//! - The adapter choosing between single-server and multi-server mode

pub mod adapter;
pub mod aggregator;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod protocol;
pub mod registry;
pub mod sse;
pub mod transport;

#[cfg(test)]
mod testing;

pub use adapter::{
    detect_mode, ActiveMode, AdapterOptions, AdapterState, HealthStatus, McpAdapter, McpBackend,
    RuntimeStats,
};
pub use aggregator::{Aggregator, ServerHealth, SkippedServer};
pub use client::{ClientOptions, ConnectionState, McpClient, RetryPolicy};
pub use config::{ConfigLoader, ConfigurationModel, ServerConfig, TransportKind};
pub use error::{AdapterError, ConfigError, McpError, TransportError};
pub use factory::{ClientFactory, TransportClientFactory};
pub use registry::ServerRegistry;
