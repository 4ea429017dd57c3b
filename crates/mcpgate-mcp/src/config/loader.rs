//! Servers file loading pipeline.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::env::EnvSubstitutor;
use super::model::ConfigurationModel;
use super::validate::validate_document;
use crate::error::ConfigError;

/// Loads and validates MCP servers files.
///
/// The pipeline is: read, parse JSON, substitute environment references,
/// validate the raw document, then deserialize into [`ConfigurationModel`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env: EnvSubstitutor,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConfigLoader {
    /// Loader reading the process environment.
    pub fn new(strict_env: bool) -> Self {
        Self {
            env: EnvSubstitutor::new(strict_env),
        }
    }

    /// Loader with a custom environment source.
    pub fn with_substitutor(env: EnvSubstitutor) -> Self {
        Self { env }
    }

    /// Load a servers file from disk.
    pub fn load(&self, path: &Path) -> Result<ConfigurationModel, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let model = self.load_str(&content, &path.display().to_string())?;
        info!(
            path = %path.display(),
            servers = model.servers.len(),
            enabled = model.enabled_servers().count(),
            "Loaded MCP servers configuration"
        );
        Ok(model)
    }

    /// Load a servers document from text. `origin` names it in errors.
    pub fn load_str(&self, content: &str, origin: &str) -> Result<ConfigurationModel, ConfigError> {
        let raw: Value = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            origin: origin.to_string(),
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        })?;

        self.load_value(raw, origin)
    }

    /// Run substitution, validation and deserialization over a parsed document.
    pub fn load_value(&self, raw: Value, origin: &str) -> Result<ConfigurationModel, ConfigError> {
        let resolved = self.env.substitute(&raw)?;

        let validation = validate_document(&resolved);
        for issue in validation.warnings() {
            warn!(origin, field = %issue.field, "{}", issue.message);
        }
        if !validation.is_ok() {
            return Err(ConfigError::Validation(
                validation.errors().into_iter().cloned().collect(),
            ));
        }

        let model: ConfigurationModel =
            serde_json::from_value(resolved).map_err(|e| ConfigError::Parse {
                origin: origin.to_string(),
                line: 0,
                column: 0,
                message: e.to_string(),
            })?;

        debug!(
            origin,
            version = model.version.as_deref().unwrap_or("-"),
            "Servers configuration validated"
        );
        Ok(model)
    }
}

/// Whether `path` holds a servers file with at least one server.
///
/// Used for mode detection; never fails and never substitutes the
/// environment.
pub fn has_servers(path: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(value) = serde_json::from_str::<Value>(&content) else {
        return false;
    };
    value
        .get("servers")
        .and_then(Value::as_array)
        .map(|servers| !servers.is_empty())
        .unwrap_or(false)
}
