//! Secrets referenced from deployment files
//!
//! Passwords and script arguments can be written as
//! `$secrets.<source>.<VARIABLE>` and are filled in from:
//! - Environment files (.env format)
//! - System environment variables

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$secrets\.([a-zA-Z0-9_-]+)\.([a-zA-Z0-9_]+)").expect("static pattern")
});

/// Replacement shown in place of secret values in rendered output
pub const MASK: &str = "********";

/// Secret source configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum SecretSource {
    /// Load from a .env file
    EnvFile {
        path: String,
        /// Variables to load (empty = all)
        #[serde(default)]
        variables: Vec<String>,
    },
    /// Load from a process environment variable
    Env { variable: String },
}

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Failed to read env file: {0}")]
    EnvFileRead(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Secret not found: {0}.{1}")]
    SecretNotFound(String, String),
}

/// A `$secrets.<source>.<VARIABLE>` reference
#[derive(Debug, Clone, PartialEq)]
pub struct SecretRef {
    pub secret_name: String,
    pub variable: String,
}

impl SecretRef {
    fn key(&self) -> String {
        format!("{}.{}", self.secret_name, self.variable)
    }
}

// ============================================================================
// SBIO: Pure functions (no I/O)
// ============================================================================

/// Parse .env content: KEY=VALUE lines, `#` comments, optional quotes.
pub fn parse_env_content(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.to_string(), unquoted.to_string()))
        })
        .collect()
}

/// Keep only the listed variables; an empty list keeps everything.
pub fn filter_variables(
    values: HashMap<String, String>,
    filter: &[String],
) -> HashMap<String, String> {
    if filter.is_empty() {
        return values;
    }
    values
        .into_iter()
        .filter(|(k, _)| filter.contains(k))
        .collect()
}

/// All secret references in a string, in order of appearance
pub fn find_secret_references(s: &str) -> Vec<SecretRef> {
    REFERENCE
        .captures_iter(s)
        .map(|caps| SecretRef {
            secret_name: caps[1].to_string(),
            variable: caps[2].to_string(),
        })
        .collect()
}

/// Replace references with values; unknown references become empty strings.
pub fn substitute_secrets(template: &str, secrets: &HashMap<String, String>) -> String {
    REFERENCE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = format!("{}.{}", &caps[1], &caps[2]);
            secrets.get(&key).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Substitute secrets in every string of a JSON document (keys untouched)
pub fn substitute_secrets_in_value(
    value: &serde_json::Value,
    secrets: &HashMap<String, String>,
) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(substitute_secrets(s, secrets)),
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|v| substitute_secrets_in_value(v, secrets))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_secrets_in_value(v, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ============================================================================
// SBIO: I/O - SecretsManager
// ============================================================================

/// Loaded secrets keyed by `source.VARIABLE`
pub struct SecretsManager {
    secrets: DashMap<String, String>,
}

impl SecretsManager {
    pub fn new() -> Self {
        Self {
            secrets: DashMap::new(),
        }
    }

    pub async fn load_all(
        &self,
        configs: &HashMap<String, SecretSource>,
    ) -> Result<(), SecretError> {
        for (name, source) in configs {
            match source {
                SecretSource::EnvFile { path, variables } => {
                    self.load_env_file(name, path, variables).await?
                }
                SecretSource::Env { variable } => self.load_env_var(name, variable)?,
            }
        }
        Ok(())
    }

    async fn load_env_file(
        &self,
        name: &str,
        path: &str,
        variables: &[String],
    ) -> Result<(), SecretError> {
        let expanded = shellexpand::tilde(path);
        let path = Path::new(expanded.as_ref());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SecretError::EnvFileRead(format!("{}: {}", path.display(), e)))?;

        for (key, value) in filter_variables(parse_env_content(&content), variables) {
            self.secrets.insert(format!("{}.{}", name, key), value);
        }
        Ok(())
    }

    fn load_env_var(&self, name: &str, variable: &str) -> Result<(), SecretError> {
        let value = std::env::var(variable)
            .map_err(|_| SecretError::EnvVarNotFound(variable.to_string()))?;
        self.secrets.insert(format!("{}.{}", name, variable), value);
        Ok(())
    }

    pub fn insert(&self, secret_name: &str, variable: &str, value: impl Into<String>) {
        self.secrets
            .insert(format!("{}.{}", secret_name, variable), value.into());
    }

    pub fn resolve(&self, secret_name: &str, variable: &str) -> Option<String> {
        self.secrets
            .get(&format!("{}.{}", secret_name, variable))
            .map(|v| v.value().clone())
    }

    /// Fail on the first reference in `value` that has no loaded secret
    pub fn check_references(&self, value: &serde_json::Value) -> Result<(), SecretError> {
        let text = value.to_string();
        for reference in find_secret_references(&text) {
            if !self.secrets.contains_key(&reference.key()) {
                return Err(SecretError::SecretNotFound(
                    reference.secret_name,
                    reference.variable,
                ));
            }
        }
        Ok(())
    }

    pub fn all_secrets(&self) -> HashMap<String, String> {
        self.secrets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn substitute_value(&self, value: &serde_json::Value) -> serde_json::Value {
        substitute_secrets_in_value(value, &self.all_secrets())
    }
}

impl Default for SecretsManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_env_content() {
        let content = r#"
# credentials
ADMIN_PASSWORD="p@ss word"
export TOKEN='abc'
PLAIN=value
EMPTY=
=orphan
"#;
        let result = parse_env_content(content);
        assert_eq!(result.get("ADMIN_PASSWORD"), Some(&"p@ss word".to_string()));
        assert_eq!(result.get("TOKEN"), Some(&"abc".to_string()));
        assert_eq!(result.get("PLAIN"), Some(&"value".to_string()));
        assert_eq!(result.get("EMPTY"), Some(&"".to_string()));
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn test_filter_variables() {
        let mut values = HashMap::new();
        values.insert("A".to_string(), "1".to_string());
        values.insert("B".to_string(), "2".to_string());

        assert_eq!(filter_variables(values.clone(), &[]).len(), 2);
        let filtered = filter_variables(values, &["B".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("B"));
    }

    #[test]
    fn test_find_secret_references() {
        let refs = find_secret_references("$secrets.vm.ADMIN_PASSWORD and $secrets.ci.TOKEN");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].secret_name, "vm");
        assert_eq!(refs[1].variable, "TOKEN");
    }

    #[test]
    fn test_substitute_in_deployment_value() {
        let mut secrets = HashMap::new();
        secrets.insert("vm.ADMIN_PASSWORD".to_string(), "hunter2".to_string());

        let value = serde_json::json!({
            "user": {"username": "azureuser", "password": "$secrets.vm.ADMIN_PASSWORD"},
            "extension": {"command": "setup.sh --token $secrets.vm.MISSING"}
        });

        let result = substitute_secrets_in_value(&value, &secrets);
        assert_eq!(result["user"]["password"], "hunter2");
        assert_eq!(result["extension"]["command"], "setup.sh --token ");
    }

    #[tokio::test]
    async fn test_load_env_file_source() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ADMIN_PASSWORD=from-file\nOTHER=x").unwrap();

        let mut configs = HashMap::new();
        configs.insert(
            "vm".to_string(),
            SecretSource::EnvFile {
                path: file.path().display().to_string(),
                variables: vec!["ADMIN_PASSWORD".to_string()],
            },
        );

        let manager = SecretsManager::new();
        manager.load_all(&configs).await.unwrap();
        assert_eq!(
            manager.resolve("vm", "ADMIN_PASSWORD"),
            Some("from-file".to_string())
        );
        assert_eq!(manager.resolve("vm", "OTHER"), None);
    }

    #[test]
    fn test_check_references() {
        let manager = SecretsManager::new();
        manager.insert("vm", "ADMIN_PASSWORD", "pw");

        let ok = serde_json::json!({"password": "$secrets.vm.ADMIN_PASSWORD"});
        assert!(manager.check_references(&ok).is_ok());

        let missing = serde_json::json!({"password": "$secrets.vm.NOPE"});
        assert!(matches!(
            manager.check_references(&missing),
            Err(SecretError::SecretNotFound(_, v)) if v == "NOPE"
        ));
    }

    #[test]
    fn test_parse_secret_source() {
        let source: SecretSource =
            serde_json::from_str(r#"{"source": "env", "variable": "ADMIN_PASSWORD"}"#).unwrap();
        assert_eq!(
            source,
            SecretSource::Env {
                variable: "ADMIN_PASSWORD".to_string()
            }
        );
    }
}
