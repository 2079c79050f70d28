//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::ContextAddArgs;
use crate::client::{ArmClient, ResourceGroupRef, ResourceManager};
use crate::cluster::{ClusterError, VmCluster, WaitPolicy};
use crate::config::{load_deployment_file, AuthType, DeploymentSpec, LoadError, OsType};
use crate::context::{self, Config, Context, ContextError, ENV_CONTEXT};
use crate::deploy::{DeployError, Deployer, DeploymentPlan, SubmitOptions};
use crate::template::{TemplateError, TemplateKind, TemplateSource, TemplateStore};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Failed to load deployment file: {0}")]
    Load(#[from] LoadError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Deployment error: {0}")]
    Deploy(#[from] DeployError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Refusing to delete '{0}' without --yes")]
    ConfirmationRequired(String),

    #[error("Script is empty")]
    EmptyScript,
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Context Commands (Pure business logic)
// ============================================================================

/// Info about a context for display
#[derive(Debug, Clone, PartialEq)]
pub struct ContextInfo {
    pub name: String,
    pub subscription: String,
    pub resource_group: Option<String>,
    pub is_current: bool,
}

impl ContextInfo {
    fn from_context(ctx: &Context, is_current: bool) -> Self {
        Self {
            name: ctx.name.clone(),
            subscription: ctx.subscription.clone(),
            resource_group: ctx.resource_group.clone(),
            is_current,
        }
    }
}

/// List all contexts. The `env` context is listed when the environment
/// carries a subscription and no saved context shadows it.
pub fn context_list(config: &Config, env: impl Fn(&str) -> Option<String>) -> Vec<ContextInfo> {
    let current = config.current_context.as_deref().unwrap_or(ENV_CONTEXT);
    let mut contexts: Vec<ContextInfo> = config
        .contexts
        .iter()
        .map(|(name, ctx)| ContextInfo::from_context(ctx, name == current))
        .collect();

    if !config.contexts.contains_key(ENV_CONTEXT) {
        if let Ok(ctx) = context::context_from_env(env) {
            contexts.push(ContextInfo::from_context(&ctx, current == ENV_CONTEXT));
        }
    }

    contexts.sort_by(|a, b| a.name.cmp(&b.name));
    contexts
}

/// Resolve the current context
pub fn context_current(
    config: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> CommandResult<ContextInfo> {
    let ctx = config.resolve(None, env)?;
    Ok(ContextInfo::from_context(&ctx, true))
}

/// Switch to a context
pub fn context_use(config: &mut Config, name: &str) -> CommandResult<()> {
    context::set_current_context(config, name)?;
    Ok(())
}

/// Add (or replace) a context. The first context added becomes current.
pub fn context_add(config: &mut Config, args: &ContextAddArgs) -> CommandResult<()> {
    let mut ctx = Context::new(&args.name, &args.subscription);
    ctx.tenant = args.tenant.clone();
    ctx.client_id = args.client_id.clone();
    if let Some(rg) = &args.default_resource_group {
        ctx = ctx.with_resource_group(rg);
    }
    if let Some(location) = &args.location {
        ctx = ctx.with_location(location);
    }
    if let Some(var) = &args.secret_env {
        ctx.secret_env = var.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        ctx = ctx.with_endpoint(endpoint);
    }
    if let Some(desc) = &args.description {
        ctx = ctx.with_description(desc);
    }

    context::add_context(config, ctx);
    if config.current_context.is_none() {
        config.current_context = Some(args.name.clone());
    }
    Ok(())
}

/// Delete a context
pub fn context_delete(config: &mut Config, name: &str) -> CommandResult<bool> {
    let removed = context::remove_context(config, name);
    Ok(removed.is_some())
}

// ============================================================================
// Validate Commands
// ============================================================================

/// Result of validating a deployment file
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub template: Option<String>,
    pub instances: Vec<String>,
    pub error: Option<String>,
}

impl ValidationResult {
    fn invalid(error: impl ToString) -> Self {
        Self {
            valid: false,
            template: None,
            instances: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Check that a parsed deployment maps onto one of the templates
pub fn validate_spec(spec: &DeploymentSpec) -> ValidationResult {
    match TemplateKind::select(spec.os, spec.cluster_size, spec.auth_type(), spec.has_extension()) {
        Ok(kind) => ValidationResult {
            valid: true,
            template: Some(kind.to_string()),
            instances: spec.instance_names(),
            error: None,
        },
        Err(e) => ValidationResult::invalid(e),
    }
}

/// Validate a deployment file without contacting Azure. SSH key
/// resources are not fetched.
pub async fn validate_deployment_file(path: &Path) -> ValidationResult {
    match load_deployment_file(path).await {
        Ok(spec) => validate_spec(&spec),
        Err(e) => ValidationResult::invalid(e),
    }
}

// ============================================================================
// Template Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateInfo {
    pub name: String,
    pub os: OsType,
    pub clustered: bool,
    pub auth: AuthType,
    pub extension: bool,
    pub source: TemplateSource,
}

/// Every template with the place it would load from
pub fn template_list(store: &TemplateStore) -> Vec<TemplateInfo> {
    TemplateKind::all()
        .into_iter()
        .map(|kind| TemplateInfo {
            name: kind.to_string(),
            os: kind.os,
            clustered: kind.clustered,
            auth: kind.auth,
            extension: kind.extension,
            source: store.source(&kind),
        })
        .collect()
}

/// Template store for a command line override or the config default
pub fn template_store(template_dir: Option<&Path>, config: &Config) -> TemplateStore {
    match template_dir
        .map(Path::to_path_buf)
        .or_else(|| config.defaults.template_dir.as_ref().map(PathBuf::from))
    {
        Some(dir) => TemplateStore::with_override_dir(dir),
        None => TemplateStore::builtin(),
    }
}

// ============================================================================
// Lifecycle helpers
// ============================================================================

/// Script text from `--script` or `--file`
pub async fn read_script(script: Option<&str>, file: Option<&Path>) -> CommandResult<String> {
    let text = match (script, file) {
        (Some(s), _) => s.to_string(),
        (None, Some(path)) => tokio::fs::read_to_string(path).await?,
        (None, None) => String::new(),
    };
    if text.trim().is_empty() {
        return Err(CommandError::EmptyScript);
    }
    Ok(text)
}

pub fn confirm_delete(name: &str, yes: bool) -> CommandResult<()> {
    if yes {
        Ok(())
    } else {
        Err(CommandError::ConfirmationRequired(name.to_string()))
    }
}

// ============================================================================
// Session: a resolved context bound to a resource manager
// ============================================================================

pub struct Session {
    context: Context,
    client: Arc<dyn ResourceManager>,
    store: TemplateStore,
    wait: WaitPolicy,
}

impl Session {
    pub fn new(
        context: Context,
        client: Arc<dyn ResourceManager>,
        store: TemplateStore,
        wait: WaitPolicy,
    ) -> Self {
        Self {
            context,
            client,
            store,
            wait,
        }
    }

    /// Resolve the context and build an ARM client for it. A resource
    /// group given here replaces the context default.
    pub fn connect(
        config: &Config,
        context_name: Option<&str>,
        resource_group: Option<&str>,
        store: TemplateStore,
        env: impl Fn(&str) -> Option<String>,
    ) -> CommandResult<Self> {
        let mut ctx = config.resolve(context_name, &env)?;
        if let Some(rg) = resource_group {
            ctx = ctx.with_resource_group(rg);
        }
        let credential = ctx.credential(&env)?;
        debug!(
            "Using context {} (subscription {}, endpoint {})",
            ctx.name,
            ctx.subscription,
            ctx.endpoint()
        );
        let client = ArmClient::with_base_url(ctx.endpoint(), credential);
        Ok(Self::new(ctx, Arc::new(client), store, config.defaults.wait_policy()))
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn group(&self) -> CommandResult<ResourceGroupRef> {
        Ok(self.context.group(None)?)
    }

    pub fn deployer(&self) -> Deployer {
        Deployer::new(self.client.clone(), self.context.clone(), self.store.clone())
            .with_wait_policy(self.wait)
    }

    pub async fn plan(&self, spec: &DeploymentSpec) -> CommandResult<DeploymentPlan> {
        Ok(self.deployer().plan(spec).await?)
    }

    pub async fn deploy(
        &self,
        plan: &DeploymentPlan,
        options: SubmitOptions,
    ) -> CommandResult<VmCluster> {
        Ok(self.deployer().submit(plan, options).await?)
    }

    /// Attach to an existing deployment
    pub async fn cluster(&self, name: &str) -> CommandResult<VmCluster> {
        let group = self.group()?;
        Ok(VmCluster::lookup_with_policy(self.client.clone(), group, name, self.wait).await?)
    }
}
