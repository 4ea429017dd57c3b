//! `${VAR}` / `${VAR:-default}` substitution over JSON documents.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::warn;

use crate::error::ConfigError;

/// Upper bound on resolution passes for indirect references.
pub const MAX_PASSES: usize = 10;

static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("environment placeholder pattern is valid")
});

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves environment references inside configuration values.
#[derive(Clone)]
pub struct EnvSubstitutor {
    strict: bool,
    lookup: Lookup,
}

impl EnvSubstitutor {
    /// Substitutor reading the process environment.
    pub fn new(strict: bool) -> Self {
        Self::with_lookup(strict, |name| std::env::var(name).ok())
    }

    /// Substitutor reading from an arbitrary source.
    pub fn with_lookup<F>(strict: bool, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            strict,
            lookup: Arc::new(lookup),
        }
    }

    /// Substitute every string inside `value`.
    ///
    /// In strict mode all unresolved names are collected and reported
    /// together. Otherwise unresolved placeholders are left in place.
    pub fn substitute(&self, value: &Value) -> Result<Value, ConfigError> {
        let mut missing = BTreeSet::new();
        let resolved = self.substitute_value(value, &mut missing);

        if missing.is_empty() {
            return Ok(resolved);
        }

        if self.strict {
            return Err(ConfigError::Environment {
                missing: missing.into_iter().collect(),
            });
        }

        warn!(
            missing = ?missing,
            "Environment variables are unset; placeholders left unresolved"
        );
        Ok(resolved)
    }

    /// Substitute a single string, recording unresolved names.
    ///
    /// Any placeholder still present after the last pass is recorded, so a
    /// self-referencing or overly deep chain counts as unresolved.
    pub fn substitute_str(&self, input: &str, missing: &mut BTreeSet<String>) -> String {
        let mut current = input.to_string();

        for _ in 0..MAX_PASSES {
            if !VAR_PATTERN.is_match(&current) {
                break;
            }

            let mut unresolved_this_pass = BTreeSet::new();
            let next = VAR_PATTERN
                .replace_all(&current, |caps: &Captures<'_>| {
                    let name = &caps[1];
                    match (self.lookup)(name).filter(|v| !v.is_empty()) {
                        Some(value) => value,
                        None => match caps.get(2) {
                            Some(default) => default.as_str().to_string(),
                            None => {
                                unresolved_this_pass.insert(name.to_string());
                                caps[0].to_string()
                            }
                        },
                    }
                })
                .into_owned();

            let settled = next == current;
            current = next;

            if settled
                || VAR_PATTERN
                    .captures_iter(&current)
                    .all(|caps| unresolved_this_pass.contains(&caps[1]))
            {
                break;
            }
        }

        missing.extend(
            VAR_PATTERN
                .captures_iter(&current)
                .map(|caps| caps[1].to_string()),
        );
        current
    }

    fn substitute_value(&self, value: &Value, missing: &mut BTreeSet<String>) -> Value {
        match value {
            Value::String(s) => Value::String(self.substitute_str(s, missing)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.substitute_value(item, missing))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_value(v, missing)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl std::fmt::Debug for EnvSubstitutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvSubstitutor")
            .field("strict", &self.strict)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn substitutor(strict: bool, vars: &[(&str, &str)]) -> EnvSubstitutor {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvSubstitutor::with_lookup(strict, move |name| vars.get(name).cloned())
    }

    #[test]
    fn test_value_and_default() {
        let env = substitutor(true, &[("A", "1")]);
        let out = env.substitute(&json!({"x": "${A}-${B:-fallback}"})).unwrap();
        assert_eq!(out, json!({"x": "1-fallback"}));
    }

    #[test]
    fn test_strict_reports_every_missing_name() {
        let env = substitutor(true, &[("A", "1")]);
        let err = env
            .substitute(&json!({
                "servers": [
                    {"url": "${B}"},
                    {"env": {"TOKEN": "${C}", "HOST": "${A}"}},
                    {"args": ["${B}", "${D:-ok}"]}
                ]
            }))
            .unwrap_err();

        match err {
            ConfigError::Environment { missing } => assert_eq!(missing, vec!["B", "C"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lenient_leaves_placeholder() {
        let env = substitutor(false, &[]);
        let out = env.substitute(&json!({"x": "${NOPE}"})).unwrap();
        assert_eq!(out, json!({"x": "${NOPE}"}));
    }

    #[test]
    fn test_indirect_reference_resolves() {
        let env = substitutor(true, &[("DB_URL", "${DB_HOST}:5432"), ("DB_HOST", "db")]);
        let mut missing = BTreeSet::new();
        assert_eq!(env.substitute_str("${DB_URL}", &mut missing), "db:5432");
        assert!(missing.is_empty());
    }

    #[test]
    fn test_self_reference_is_reported() {
        let env = substitutor(true, &[("LOOP", "${LOOP}"), ("HOST", "db")]);
        let mut missing = BTreeSet::new();
        let out = env.substitute_str("${LOOP}", &mut missing);
        assert_eq!(out, "${LOOP}");
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["LOOP"]);

        let err = env
            .substitute(&json!({"url": "http://${HOST}/${LOOP}"}))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Environment { ref missing } if missing == &["LOOP"]));
    }

    #[test]
    fn test_chain_deeper_than_pass_limit_is_reported() {
        let names: Vec<String> = (0..=MAX_PASSES + 1).map(|i| format!("V{}", i)).collect();
        let mut vars: Vec<(String, String)> = names
            .windows(2)
            .map(|pair| (pair[0].clone(), format!("${{{}}}", pair[1])))
            .collect();
        vars.push((names[MAX_PASSES + 1].clone(), "end".to_string()));
        let vars: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let env = substitutor(true, &vars);

        let err = env.substitute(&json!({"x": "${V0}"})).unwrap_err();
        assert!(matches!(err, ConfigError::Environment { ref missing } if missing.len() == 1));

        let lenient = substitutor(false, &vars);
        let out = lenient.substitute(&json!({"x": "${V0}"})).unwrap();
        assert!(out["x"].as_str().unwrap().starts_with("${V"));
    }

    #[test]
    fn test_empty_value_uses_default() {
        let env = substitutor(true, &[("PORT", "")]);
        let mut missing = BTreeSet::new();
        assert_eq!(env.substitute_str("${PORT:-8080}", &mut missing), "8080");
    }

    #[test]
    fn test_non_strings_untouched() {
        let env = substitutor(true, &[]);
        let doc = json!({"priority": 5, "critical": true, "domains": null});
        assert_eq!(env.substitute(&doc).unwrap(), doc);
    }
}
