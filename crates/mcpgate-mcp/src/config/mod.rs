//! MCP servers file: model, environment substitution, validation, loading.

mod env;
mod loader;
mod model;
mod validate;

pub use env::EnvSubstitutor;
pub use loader::{has_servers, ConfigLoader};
pub use model::{ConfigurationModel, ServerConfig, ServerDefaults, TransportKind, DEFAULT_PRIORITY};
pub use validate::validate_document;

pub(crate) use model::secs;
