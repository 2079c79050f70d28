//! Turning a deployment file into a submitted ARM deployment.
//!
//! Planning selects the template, resolves the admin login and location,
//! and produces the full request body. Submission optionally creates the
//! resource group, PUTs the deployment in incremental mode and hands back
//! a [`VmCluster`] for the result.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::client::{api_versions, ClientError, ResourceGroupRef, ResourceManager};
use crate::cluster::{ClusterError, DeploymentRecord, VmCluster, WaitPolicy};
use crate::config::{DeploymentSpec, Login, SshKey};
use crate::context::{Context, ContextError};
use crate::template::{
    mask_secure_parameters, resolve_parameters, ResolvedLogin, TemplateError, TemplateKind,
    TemplateParameters, TemplateStore,
};

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("No location for resource group '{0}': set one in the deployment file or context")]
    NoLocation(String),

    #[error("SSH key resource {0} has no public key")]
    EmptyKeyResource(String),

    #[error("Timed out waiting for deployment '{0}'")]
    WaitTimeout(String),
}

/// Everything needed to submit one deployment
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPlan {
    pub name: String,
    pub group: ResourceGroupRef,
    pub location: String,
    pub kind: TemplateKind,
    pub template: Value,
    pub parameters: Map<String, Value>,
}

impl DeploymentPlan {
    /// Request body for `PUT .../deployments/{name}`
    pub fn body(&self) -> Value {
        json!({
            "properties": {
                "mode": "Incremental",
                "template": self.template,
                "parameters": self.parameters,
            }
        })
    }

    /// Parameters with secure values masked, for display
    pub fn masked_parameters(&self) -> Map<String, Value> {
        mask_secure_parameters(&self.template, &self.parameters)
    }

    /// Dry-run rendering: the request that would be sent, secrets masked
    pub fn render(&self) -> String {
        let rendered = json!({
            "deployment": self.name,
            "resourceGroup": self.group.resource_group,
            "subscription": self.group.subscription_id,
            "location": self.location,
            "template": self.kind.file_name(),
            "parameters": self.masked_parameters(),
        });
        serde_json::to_string_pretty(&rendered).unwrap_or_else(|_| rendered.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitOptions {
    /// Create (or update) the resource group before deploying
    pub create_resource_group: bool,
    /// Wait for the deployment to finish provisioning
    pub wait: bool,
}

pub struct Deployer {
    client: Arc<dyn ResourceManager>,
    context: Context,
    store: TemplateStore,
    wait: WaitPolicy,
}

impl Deployer {
    pub fn new(client: Arc<dyn ResourceManager>, context: Context, store: TemplateStore) -> Self {
        Self {
            client,
            context,
            store,
            wait: WaitPolicy::default(),
        }
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    async fn resolve_login(&self, spec: &DeploymentSpec) -> Result<ResolvedLogin, DeployError> {
        match spec.user.login() {
            Login::Password(pw) => Ok(ResolvedLogin::Password(pw.clone())),
            Login::SshKey(SshKey::Literal(key)) => Ok(ResolvedLogin::SshKey(key.clone())),
            Login::SshKey(SshKey::Resource(id)) => {
                debug!("Fetching public key from {}", id);
                let body = self.client.get(id, api_versions::COMPUTE).await?;
                body["properties"]["publicKey"]
                    .as_str()
                    .filter(|k| !k.trim().is_empty())
                    .map(|k| ResolvedLogin::SshKey(k.trim().to_string()))
                    .ok_or_else(|| DeployError::EmptyKeyResource(id.clone()))
            }
        }
    }

    async fn resolve_location(
        &self,
        spec: &DeploymentSpec,
        group: &ResourceGroupRef,
    ) -> Result<String, DeployError> {
        if let Some(location) = spec.location.as_ref().or(self.context.location.as_ref()) {
            return Ok(location.clone());
        }
        match self.client.get(&group.path(), api_versions::RESOURCES).await {
            Ok(body) => body["location"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| DeployError::NoLocation(group.resource_group.clone())),
            Err(e) if e.is_not_found() => Err(DeployError::NoLocation(group.resource_group.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Select the template and resolve every parameter value
    pub async fn plan(&self, spec: &DeploymentSpec) -> Result<DeploymentPlan, DeployError> {
        let group = self.context.group(spec.resource_group.as_deref())?;
        let kind = TemplateKind::select(
            spec.os,
            spec.cluster_size,
            spec.auth_type(),
            spec.has_extension(),
        )?;
        let template = self.store.load(&kind).await?;
        let location = self.resolve_location(spec, &group).await?;
        let login = self.resolve_login(spec).await?;

        let params = TemplateParameters::build(spec, &group, &location, &login);
        let parameters = resolve_parameters(&template, &params)?;
        debug!(
            "Planned {} with template {} ({} parameters)",
            spec.name,
            kind,
            parameters.len()
        );

        Ok(DeploymentPlan {
            name: spec.name.clone(),
            group,
            location,
            kind,
            template,
            parameters,
        })
    }

    async fn wait_for_deployment(&self, plan: &DeploymentPlan) -> Result<(), DeployError> {
        let path = plan.group.deployment_path(&plan.name);
        for attempt in 1..=self.wait.max_attempts {
            let body = self.client.get(&path, api_versions::RESOURCES).await?;
            let record = DeploymentRecord::parse(&body);
            if record.is_succeeded() || record.is_failed() {
                info!(
                    "Deployment {} finished: {}",
                    plan.name, record.provisioning_state
                );
                return Ok(());
            }
            debug!(
                "Deployment {} is {} (attempt {}/{})",
                plan.name, record.provisioning_state, attempt, self.wait.max_attempts
            );
            tokio::time::sleep(self.wait.interval).await;
        }
        Err(DeployError::WaitTimeout(plan.name.clone()))
    }

    /// Submit a plan and attach to the resulting deployment
    pub async fn submit(
        &self,
        plan: &DeploymentPlan,
        options: SubmitOptions,
    ) -> Result<VmCluster, DeployError> {
        if options.create_resource_group {
            info!(
                "Creating resource group {} in {}",
                plan.group.resource_group, plan.location
            );
            self.client
                .put(
                    &plan.group.path(),
                    api_versions::RESOURCES,
                    &json!({ "location": plan.location }),
                )
                .await?;
        }

        info!(
            "Submitting deployment {} ({}) to {}",
            plan.name, plan.kind, plan.group
        );
        self.client
            .put(
                &plan.group.deployment_path(&plan.name),
                api_versions::RESOURCES,
                &plan.body(),
            )
            .await?;

        if options.wait {
            self.wait_for_deployment(plan).await?;
        }

        Ok(VmCluster::lookup_with_policy(
            self.client.clone(),
            plan.group.clone(),
            plan.name.clone(),
            self.wait,
        )
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockResourceManager;
    use crate::cluster::ClusterState;
    use crate::config::secrets::MASK;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHk user@host";

    fn context() -> Context {
        Context::new("test", "sub")
            .with_resource_group("rg")
            .with_location("australiaeast")
    }

    fn deployer(mock: Arc<MockResourceManager>, ctx: Context) -> Deployer {
        Deployer::new(mock, ctx, TemplateStore::builtin()).with_wait_policy(WaitPolicy::immediate(3))
    }

    fn key_spec(extra: &str) -> DeploymentSpec {
        DeploymentSpec::from_str(&format!(
            r#"{{"name": "web", "os": "ubuntu",
                "user": {{"username": "azureuser", "sshkey": "{}"}}{}}}"#,
            KEY, extra
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_plan_single_vm() {
        let mock = Arc::new(MockResourceManager::new());
        let plan = deployer(mock, context()).plan(&key_spec("")).await.unwrap();

        assert_eq!(plan.kind.file_name(), "ubuntu_vm_key.json");
        assert_eq!(plan.location, "australiaeast");
        assert_eq!(plan.parameters["sshKeyData"]["value"], KEY);
        assert_eq!(plan.parameters["location"]["value"], "australiaeast");
        assert_eq!(plan.body()["properties"]["mode"], "Incremental");
    }

    #[tokio::test]
    async fn test_plan_overrides_group_and_location() {
        let mock = Arc::new(MockResourceManager::new());
        let spec = key_spec(r#", "resource-group": "rg-other", "location": "westeurope""#);
        let plan = deployer(mock, context()).plan(&spec).await.unwrap();
        assert_eq!(plan.group.resource_group, "rg-other");
        assert_eq!(plan.location, "westeurope");
    }

    #[tokio::test]
    async fn test_location_from_resource_group() {
        let mock = Arc::new(MockResourceManager::new());
        mock.insert("/subscriptions/sub/resourceGroups/rg", json!({"location": "japaneast"}));
        let ctx = Context::new("test", "sub").with_resource_group("rg");

        let plan = deployer(mock, ctx.clone()).plan(&key_spec("")).await.unwrap();
        assert_eq!(plan.location, "japaneast");

        let empty = Arc::new(MockResourceManager::new());
        assert!(matches!(
            deployer(empty, ctx).plan(&key_spec("")).await,
            Err(DeployError::NoLocation(_))
        ));
    }

    #[tokio::test]
    async fn test_plan_fetches_key_resource() {
        let key_id = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/sshPublicKeys/ops";
        let mock = Arc::new(MockResourceManager::new());
        mock.insert(key_id, json!({"properties": {"publicKey": format!("{}\n", KEY)}}));

        let spec = DeploymentSpec::from_str(&format!(
            r#"{{"name": "web", "os": "ubuntu",
                "user": {{"username": "azureuser", "sshkey": {{"resource": "{}"}}}}}}"#,
            key_id
        ))
        .unwrap();

        let plan = deployer(mock.clone(), context()).plan(&spec).await.unwrap();
        assert_eq!(plan.parameters["sshKeyData"]["value"], KEY);

        mock.insert(key_id, json!({"properties": {}}));
        assert!(matches!(
            deployer(mock, context()).plan(&spec).await,
            Err(DeployError::EmptyKeyResource(_))
        ));
    }

    #[tokio::test]
    async fn test_render_masks_secrets() {
        let mock = Arc::new(MockResourceManager::new());
        let spec = DeploymentSpec::from_str(
            r#"{"name": "win", "os": "windows",
                "user": {"username": "azureadmin", "password": "Sup3r-secret!"},
                "extension": {"command": "powershell -File setup.ps1 -Token abc123"}}"#,
        )
        .unwrap();

        let plan = deployer(mock, context()).plan(&spec).await.unwrap();
        assert_eq!(plan.kind.file_name(), "windows_vm_ext.json");

        let rendered = plan.render();
        assert!(!rendered.contains("Sup3r-secret!"));
        assert!(!rendered.contains("abc123"));
        assert!(rendered.contains(MASK));
        assert!(rendered.contains("azureadmin"));

        // the real body keeps the values
        assert_eq!(plan.body()["properties"]["parameters"]["adminPassword"]["value"], "Sup3r-secret!");
    }

    #[tokio::test]
    async fn test_submit_creates_group_and_attaches() {
        let mock = Arc::new(MockResourceManager::new());
        let group = ResourceGroupRef::new("sub", "rg");
        mock.seed_vm(&group, "web", "Linux", "running");

        let deployer = deployer(mock.clone(), context());
        let plan = deployer.plan(&key_spec("")).await.unwrap();
        let options = SubmitOptions {
            create_resource_group: true,
            wait: true,
        };
        let cluster = deployer.submit(&plan, options).await.unwrap();

        assert_eq!(cluster.state(), &ClusterState::Ready);
        assert_eq!(cluster.instances()[0].name, "web");

        let puts = mock.calls_matching("PUT", "");
        assert_eq!(puts.len(), 2);
        assert!(puts[0].path.ends_with("/resourceGroups/rg"));
        assert_eq!(puts[0].body.as_ref().unwrap()["location"], "australiaeast");
        assert!(puts[1].path.ends_with("/deployments/web"));
    }

    #[tokio::test]
    async fn test_submit_without_vms_reports_in_progress() {
        let mock = Arc::new(MockResourceManager::new());
        let deployer = deployer(mock.clone(), context());
        let plan = deployer.plan(&key_spec("")).await.unwrap();

        let cluster = deployer.submit(&plan, SubmitOptions::default()).await.unwrap();
        assert_eq!(cluster.state(), &ClusterState::DeploymentInProgress);
        assert!(mock.calls_matching("PUT", "/resourceGroups/rg").is_empty());
    }

    #[tokio::test]
    async fn test_plan_requires_resource_group() {
        let mock = Arc::new(MockResourceManager::new());
        let ctx = Context::new("test", "sub").with_location("eastus");
        assert!(matches!(
            deployer(mock, ctx).plan(&key_spec("")).await,
            Err(DeployError::Context(ContextError::NoResourceGroup(_)))
        ));
    }
}
