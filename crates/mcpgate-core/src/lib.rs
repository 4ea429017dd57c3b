//! # mcpgate-core
//!
//! Core types shared by the mcpgate crates.
//!
//! This crate provides:
//! - Gateway settings (adapter mode, fallback policy, single-server backend)
//! - The top-level error type with recovery suggestions

pub mod config;
pub mod error;

pub use config::{AdapterMode, Config};
pub use error::{format_error_with_suggestion, Error, Result};
