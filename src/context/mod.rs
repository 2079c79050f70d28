use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{ClientSecretCredential, Credential, ResourceGroupRef, DEFAULT_ENDPOINT};
use crate::cluster::WaitPolicy;

/// Name of the built-in context assembled from `AZURE_*` environment variables
pub const ENV_CONTEXT: &str = "env";

/// Environment variable holding the client secret unless a context names another
pub const DEFAULT_SECRET_ENV: &str = "AZURE_CLIENT_SECRET";

/// Environment variable checked for a pre-acquired bearer token
pub const DEFAULT_TOKEN_ENV: &str = "AZURE_ACCESS_TOKEN";

/// Default config file location: ~/.azvm/config
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".azvm")
        .join("config")
}

/// Errors that can occur during context operations
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Context '{0}' not found")]
    ContextNotFound(String),

    #[error("Context '{0}' has no subscription (set AZURE_SUBSCRIPTION_ID or add one)")]
    NoSubscription(String),

    #[error("No resource group given and context '{0}' has no default")]
    NoResourceGroup(String),

    #[error("No credentials for context '{0}': set {1}, or a tenant, client id and client secret")]
    NoCredentials(String, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A subscription plus the identity and defaults used against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Context {
    /// Display name for this context
    pub name: String,
    pub subscription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Default resource group for deployments and lookups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    /// Default location for new resource groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Service principal application id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Environment variable holding the client secret
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    /// Environment variable holding a pre-acquired bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Management endpoint, for sovereign clouds or test servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_secret_env() -> String {
    DEFAULT_SECRET_ENV.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

/// The complete configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Currently active context name
    #[serde(rename = "current-context")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,

    /// Map of context name to context definition
    #[serde(default)]
    pub contexts: HashMap<String, Context>,

    #[serde(default)]
    pub defaults: Defaults,
}

/// Settings shared by all contexts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Defaults {
    /// Directory whose templates shadow the built-in ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<String>,
    #[serde(default = "default_wait_interval")]
    pub wait_interval_secs: u64,
    #[serde(default = "default_wait_attempts")]
    pub wait_attempts: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            template_dir: None,
            wait_interval_secs: default_wait_interval(),
            wait_attempts: default_wait_attempts(),
        }
    }
}

fn default_wait_interval() -> u64 {
    10
}

fn default_wait_attempts() -> u32 {
    90
}

impl Defaults {
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(Duration::from_secs(self.wait_interval_secs), self.wait_attempts)
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Parse config from YAML string
pub fn parse_config(content: &str) -> Result<Config, ContextError> {
    serde_yaml::from_str(content).map_err(|e| ContextError::ParseError(e.to_string()))
}

/// Serialize config to YAML string
pub fn serialize_config(config: &Config) -> Result<String, ContextError> {
    serde_yaml::to_string(config).map_err(|e| ContextError::WriteError(e.to_string()))
}

/// Add or update a context in the config
pub fn add_context(config: &mut Config, context: Context) {
    config.contexts.insert(context.name.clone(), context);
}

/// Remove a context from the config
pub fn remove_context(config: &mut Config, name: &str) -> Option<Context> {
    let removed = config.contexts.remove(name);
    if config.current_context.as_deref() == Some(name) {
        config.current_context = None;
    }
    removed
}

/// Set the current context
pub fn set_current_context(config: &mut Config, name: &str) -> Result<(), ContextError> {
    if !config.contexts.contains_key(name) && name != ENV_CONTEXT {
        return Err(ContextError::ContextNotFound(name.to_string()));
    }
    config.current_context = Some(name.to_string());
    Ok(())
}

/// Build the `env` context from `AZURE_*` variables
pub fn context_from_env(env: impl Fn(&str) -> Option<String>) -> Result<Context, ContextError> {
    let subscription = env("AZURE_SUBSCRIPTION_ID")
        .ok_or_else(|| ContextError::NoSubscription(ENV_CONTEXT.to_string()))?;
    let mut ctx = Context::new(ENV_CONTEXT, subscription);
    ctx.tenant = env("AZURE_TENANT_ID");
    ctx.client_id = env("AZURE_CLIENT_ID");
    ctx.resource_group = env("AZURE_RESOURCE_GROUP");
    ctx.location = env("AZURE_LOCATION");
    ctx.endpoint = env("AZURE_RESOURCE_MANAGER_ENDPOINT");
    ctx.authority = env("AZURE_AUTHORITY_HOST");
    Ok(ctx)
}

// ============================================================================
// I/O boundary functions
// ============================================================================

/// Load config from a specific path; a missing file is an empty config
pub fn load_config_from(path: &Path) -> Result<Config, ContextError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Save config to a specific path
pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ContextError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serialize_config(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

impl Config {
    /// Resolve a context by name (or the current one), building the
    /// built-in `env` context from the environment when selected.
    pub fn resolve(
        &self,
        name: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Context, ContextError> {
        let name = name
            .or(self.current_context.as_deref())
            .unwrap_or(ENV_CONTEXT);
        match self.contexts.get(name) {
            Some(ctx) => Ok(ctx.clone()),
            None if name == ENV_CONTEXT => context_from_env(env),
            None => Err(ContextError::ContextNotFound(name.to_string())),
        }
    }
}

impl Context {
    /// Create a new context
    pub fn new(name: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscription: subscription.into(),
            tenant: None,
            resource_group: None,
            location: None,
            client_id: None,
            secret_env: default_secret_env(),
            token_env: default_token_env(),
            endpoint: None,
            authority: None,
            description: None,
        }
    }

    pub fn with_resource_group(mut self, rg: impl Into<String>) -> Self {
        self.resource_group = Some(rg.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_service_principal(
        mut self,
        tenant: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        self.tenant = Some(tenant.into());
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Add a description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    /// Resource group: an explicit override, else the context default
    pub fn group(&self, resource_group: Option<&str>) -> Result<ResourceGroupRef, ContextError> {
        let rg = resource_group
            .or(self.resource_group.as_deref())
            .ok_or_else(|| ContextError::NoResourceGroup(self.name.clone()))?;
        Ok(ResourceGroupRef::new(&self.subscription, rg))
    }

    /// A bearer token in `token_env` wins; otherwise a service principal
    /// secret read from `secret_env`.
    pub fn credential(&self, env: impl Fn(&str) -> Option<String>) -> Result<Credential, ContextError> {
        if let Some(token) = env(&self.token_env).filter(|t| !t.is_empty()) {
            return Ok(Credential::Static(token));
        }

        let secret = env(&self.secret_env).filter(|s| !s.is_empty());
        match (&self.tenant, &self.client_id, secret) {
            (Some(tenant), Some(client_id), Some(secret)) => {
                let mut cred = ClientSecretCredential::new(tenant, client_id, secret, self.endpoint());
                if let Some(authority) = &self.authority {
                    cred = cred.with_authority(authority);
                }
                Ok(Credential::ClientSecret(cred))
            }
            _ => Err(ContextError::NoCredentials(
                self.name.clone(),
                self.token_env.clone(),
            )),
        }
    }
}
