//! Structural validation of the raw servers document.
//!
//! Runs on the JSON value after environment substitution and before typed
//! deserialization, so every problem is reported with its field path instead
//! of failing on the first serde error.

use std::collections::HashSet;

use mcpgate_core::config::ValidationResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::model::{TransportKind, MAX_SECONDS};

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("name pattern is valid"));

static SEMVER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?$")
        .expect("semver pattern is valid")
});

const ROOT_FIELDS: &[&str] = &["version", "servers", "defaults", "metadata"];

const SERVER_FIELDS: &[&str] = &[
    "name",
    "transport",
    "description",
    "command",
    "args",
    "env",
    "cwd",
    "url",
    "headers",
    "priority",
    "domains",
    "critical",
    "enabled",
    "timeout",
    "retry_attempts",
    "retry_delay",
];

const DEFAULT_FIELDS: &[&str] = &[
    "timeout",
    "retry_attempts",
    "retry_delay",
    "backoff_factor",
    "max_delay",
    "shutdown_timeout",
];

/// Validate a servers document, collecting every issue.
pub fn validate_document(doc: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    let Some(root) = doc.as_object() else {
        result.add_error("$", "configuration root must be an object");
        return result;
    };

    for key in root.keys() {
        if !ROOT_FIELDS.contains(&key.as_str()) {
            result.add_warning(key, "unknown field is ignored");
        }
    }

    if let Some(version) = root.get("version") {
        match version.as_str() {
            Some(v) if SEMVER_PATTERN.is_match(v) => {}
            Some(v) => result.add_error("version", format!("'{}' is not a semantic version", v)),
            None => result.add_error("version", "must be a string"),
        }
    }

    match root.get("servers") {
        None => result.add_error("servers", "is required"),
        Some(Value::Object(_)) => result.add_error(
            "servers",
            "must be an array of server objects, not a map keyed by name",
        ),
        Some(Value::Array(servers)) => {
            if servers.is_empty() {
                result.add_warning("servers", "no servers are configured");
            }
            let mut seen = HashSet::new();
            for (index, server) in servers.iter().enumerate() {
                validate_server(index, server, &mut seen, &mut result);
            }
        }
        Some(_) => result.add_error("servers", "must be an array"),
    }

    if let Some(defaults) = root.get("defaults") {
        validate_defaults(defaults, &mut result);
    }

    if let Some(metadata) = root.get("metadata") {
        if !metadata.is_object() {
            result.add_error("metadata", "must be an object");
        }
    }

    result
}

fn validate_server(
    index: usize,
    server: &Value,
    seen: &mut HashSet<String>,
    result: &mut ValidationResult,
) {
    let path = format!("servers[{}]", index);
    let field = |name: &str| format!("{}.{}", path, name);

    let Some(obj) = server.as_object() else {
        result.add_error(&path, "must be an object");
        return;
    };

    for key in obj.keys() {
        if !SERVER_FIELDS.contains(&key.as_str()) {
            result.add_warning(field(key), "unknown field is ignored");
        }
    }

    match obj.get("name").map(Value::as_str) {
        None => result.add_error(field("name"), "is required"),
        Some(None) => result.add_error(field("name"), "must be a string"),
        Some(Some(name)) => {
            if !NAME_PATTERN.is_match(name) {
                result.add_error(
                    field("name"),
                    format!("'{}' must be kebab-case (lowercase letters, digits, hyphens)", name),
                );
            }
            if !seen.insert(name.to_string()) {
                result.add_error(field("name"), format!("duplicate server name '{}'", name));
            }
        }
    }

    let transport = match obj.get("transport").map(Value::as_str) {
        None => {
            result.add_error(field("transport"), "is required");
            None
        }
        Some(None) => {
            result.add_error(field("transport"), "must be a string");
            None
        }
        Some(Some(t)) => match t.parse::<TransportKind>() {
            Ok(kind) => Some(kind),
            Err(message) => {
                result.add_error(field("transport"), message);
                None
            }
        },
    };

    match transport {
        Some(TransportKind::Stdio) => match obj.get("command") {
            Some(Value::String(cmd)) if !cmd.trim().is_empty() => {}
            Some(Value::String(_)) => result.add_error(field("command"), "must not be empty"),
            Some(_) => result.add_error(field("command"), "must be a string"),
            None => result.add_error(field("command"), "is required for stdio transport"),
        },
        Some(kind @ (TransportKind::Sse | TransportKind::Http)) => match obj.get("url") {
            Some(Value::String(url)) => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    result.add_error(
                        field("url"),
                        format!("'{}' must start with http:// or https://", url),
                    );
                }
            }
            Some(_) => result.add_error(field("url"), "must be a string"),
            None => result.add_error(field("url"), format!("is required for {} transport", kind)),
        },
        None => {}
    }

    if let Some(priority) = obj.get("priority") {
        match priority.as_i64() {
            Some(p) if (1..=100).contains(&p) => {}
            Some(_) => result.add_error(field("priority"), "must be between 1 and 100"),
            None => result.add_error(field("priority"), "must be an integer"),
        }
    }

    check_string_array(obj, "args", &field("args"), result);
    check_string_array(obj, "domains", &field("domains"), result);
    check_string_map(obj, "env", &field("env"), result);
    check_string_map(obj, "headers", &field("headers"), result);

    for key in ["description", "cwd"] {
        if let Some(value) = obj.get(key) {
            if !value.is_string() {
                result.add_error(field(key), "must be a string");
            }
        }
    }

    for key in ["critical", "enabled"] {
        if let Some(value) = obj.get(key) {
            if !value.is_boolean() {
                result.add_error(field(key), "must be a boolean");
            }
        }
    }

    for key in ["timeout", "retry_delay"] {
        check_seconds(obj, key, &field(key), result);
    }
    check_attempts(obj, &field("retry_attempts"), result);
}

fn validate_defaults(defaults: &Value, result: &mut ValidationResult) {
    let Some(obj) = defaults.as_object() else {
        result.add_error("defaults", "must be an object");
        return;
    };

    for key in obj.keys() {
        if !DEFAULT_FIELDS.contains(&key.as_str()) {
            result.add_warning(format!("defaults.{}", key), "unknown field is ignored");
        }
    }

    for key in ["timeout", "retry_delay", "max_delay", "shutdown_timeout"] {
        check_seconds(obj, key, &format!("defaults.{}", key), result);
    }
    check_non_negative_number(obj, "backoff_factor", "defaults.backoff_factor", result);
    check_attempts(obj, "defaults.retry_attempts", result);
}

fn check_string_array(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    result: &mut ValidationResult,
) {
    match obj.get(key) {
        None => {}
        Some(Value::Array(items)) => {
            if items.iter().any(|item| !item.is_string()) {
                result.add_error(path, "must contain only strings");
            }
        }
        Some(_) => result.add_error(path, "must be an array of strings"),
    }
}

fn check_string_map(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    result: &mut ValidationResult,
) {
    match obj.get(key) {
        None => {}
        Some(Value::Object(map)) => {
            for (name, value) in map {
                if !value.is_string() {
                    result.add_error(format!("{}.{}", path, name), "must be a string");
                }
            }
        }
        Some(_) => result.add_error(path, "must be an object of strings"),
    }
}

fn check_non_negative_number(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    result: &mut ValidationResult,
) {
    if let Some(value) = obj.get(key) {
        match value.as_f64() {
            Some(n) if n >= 0.0 => {}
            Some(_) => result.add_error(path, "must not be negative"),
            None => result.add_error(path, "must be a number"),
        }
    }
}

/// A duration in seconds: non-negative and at most [`MAX_SECONDS`].
fn check_seconds(obj: &Map<String, Value>, key: &str, path: &str, result: &mut ValidationResult) {
    if let Some(value) = obj.get(key) {
        match value.as_f64() {
            Some(n) if n > MAX_SECONDS => {
                result.add_error(path, format!("must be <= {}", MAX_SECONDS))
            }
            _ => check_non_negative_number(obj, key, path, result),
        }
    }
}

fn check_attempts(obj: &Map<String, Value>, path: &str, result: &mut ValidationResult) {
    if let Some(value) = obj.get("retry_attempts") {
        match value.as_u64() {
            Some(n) if u32::try_from(n).is_ok() => {}
            Some(_) => result.add_error(path, format!("must be <= {}", u32::MAX)),
            None => result.add_error(path, "must be a non-negative integer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn error_fields(result: &ValidationResult) -> Vec<String> {
        result.errors().iter().map(|issue| issue.field.clone()).collect()
    }

    #[test]
    fn test_valid_document() {
        let result = validate_document(&json!({
            "version": "1.0.0",
            "servers": [
                {"name": "postgres-db", "transport": "stdio", "command": "mcp-postgres", "priority": 10},
                {"name": "catalog", "transport": "sse", "url": "http://localhost:8000/sse"}
            ],
            "defaults": {"timeout": 10}
        }));
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(result.warnings().len(), 0);
    }

    #[test]
    fn test_servers_map_is_rejected_with_hint() {
        let result = validate_document(&json!({
            "servers": {"db": {"transport": "stdio", "command": "x"}}
        }));
        let errors = result.errors();
        let issue = errors[0];
        assert_eq!(issue.field, "servers");
        assert!(issue.message.contains("array"));
    }

    #[test]
    fn test_collects_every_server_issue() {
        let result = validate_document(&json!({
            "servers": [
                {"name": "Bad_Name", "transport": "stdio"},
                {"name": "web", "transport": "sse", "url": "ftp://host"},
                {"name": "web", "transport": "websocket", "priority": 0}
            ]
        }));

        let fields = error_fields(&result);
        assert!(fields.contains(&"servers[0].name".to_string()));
        assert!(fields.contains(&"servers[0].command".to_string()));
        assert!(fields.contains(&"servers[1].url".to_string()));
        assert!(fields.contains(&"servers[2].name".to_string()));
        assert!(fields.contains(&"servers[2].transport".to_string()));
        assert!(fields.contains(&"servers[2].priority".to_string()));
    }

    #[test]
    fn test_priority_bounds() {
        for (priority, ok) in [(json!(1), true), (json!(100), true), (json!(101), false), (json!(2.5), false)] {
            let result = validate_document(&json!({
                "servers": [{"name": "a", "transport": "stdio", "command": "x", "priority": priority}]
            }));
            assert_eq!(result.is_ok(), ok, "priority {}", priority);
        }
    }

    #[test]
    fn test_empty_servers_is_warning() {
        let result = validate_document(&json!({"servers": []}));
        assert!(result.is_ok());
        assert_eq!(result.warnings().len(), 1);
    }

    #[test]
    fn test_bad_version_and_unknown_fields() {
        let result = validate_document(&json!({
            "version": "v1",
            "servers": [{"name": "a", "transport": "http", "url": "https://x", "colour": "red"}]
        }));
        assert_eq!(error_fields(&result), vec!["version"]);
        assert_eq!(result.warnings()[0].field, "servers[0].colour");
    }

    #[test]
    fn test_field_types() {
        let result = validate_document(&json!({
            "servers": [{
                "name": "a",
                "transport": "stdio",
                "command": "x",
                "args": "--flag",
                "env": {"PORT": 8080},
                "critical": "yes",
                "timeout": -1
            }],
            "defaults": {"retry_attempts": -2}
        }));
        let fields = error_fields(&result);
        assert!(fields.contains(&"servers[0].args".to_string()));
        assert!(fields.contains(&"servers[0].env.PORT".to_string()));
        assert!(fields.contains(&"servers[0].critical".to_string()));
        assert!(fields.contains(&"servers[0].timeout".to_string()));
        assert!(fields.contains(&"defaults.retry_attempts".to_string()));
    }

    #[test]
    fn test_duration_and_attempt_bounds() {
        let result = validate_document(&json!({
            "servers": [{
                "name": "a",
                "transport": "http",
                "url": "http://x",
                "timeout": 1e30,
                "retry_delay": 86400,
                "retry_attempts": 5_000_000_000u64
            }],
            "defaults": {"max_delay": 1e300, "shutdown_timeout": 86401, "retry_attempts": 4294967296u64}
        }));

        let fields = error_fields(&result);
        assert_eq!(
            fields,
            vec![
                "servers[0].timeout",
                "servers[0].retry_attempts",
                "defaults.max_delay",
                "defaults.shutdown_timeout",
                "defaults.retry_attempts"
            ]
        );
        let errors = result.errors();
        assert_eq!(errors[0].message, "must be <= 86400");
        assert_eq!(errors[1].message, "must be <= 4294967295");
    }
}
