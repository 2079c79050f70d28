use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::instance::{parse_vm, script_output_text, PowerState, VmInstance};
use super::{ClusterError, WaitPolicy, INIT_ATTEMPTS};
use crate::client::{api_versions, ClientError, ResourceGroupRef, ResourceId, ResourceManager};

const VM_TYPE: &str = "Microsoft.Compute/virtualMachines";

/// Resource types in the order they are deleted
const DELETION_ORDER: &[&str] = &[
    VM_TYPE,
    "Microsoft.Compute/disks",
    "Microsoft.Network/networkInterfaces",
    "Microsoft.Network/publicIPAddresses",
    "Microsoft.Network/networkSecurityGroups",
    "Microsoft.Network/virtualNetworks",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterState {
    Ready,
    /// Resources could not be materialized yet; not an error
    DeploymentInProgress,
    /// Provisioning ended as `Failed` or `Canceled`, with the provider's message
    DeploymentFailed(String),
}

/// Output a script produced on one VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub instance: String,
    pub output: String,
}

/// Result of a lifecycle call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Applied to this many instances
    Applied(usize),
    DeploymentInProgress,
}

/// The parts of a deployment resource the wrapper cares about
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRecord {
    pub provisioning_state: String,
    pub error: Option<String>,
    pub vm_names: Vec<String>,
    pub output_resources: Vec<ResourceId>,
}

impl DeploymentRecord {
    /// Parse a `Microsoft.Resources/deployments` body. VM names come from
    /// the `vmName` / `instanceCount` parameters, falling back to the VMs
    /// listed among the output resources.
    pub fn parse(value: &Value) -> Self {
        let props = &value["properties"];
        let output_resources: Vec<ResourceId> = props["outputResources"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|r| r["id"].as_str())
            .filter_map(|id| ResourceId::parse(id).ok())
            .collect();

        let params = &props["parameters"];
        let vm_names = match params["vmName"]["value"].as_str() {
            Some(name) => match params["instanceCount"]["value"].as_u64() {
                Some(count) => (0..count).map(|i| format!("{}{}", name, i)).collect(),
                None => vec![name.to_string()],
            },
            None => output_resources
                .iter()
                .filter(|id| id.is_type(VM_TYPE))
                .map(|id| id.name().to_string())
                .collect(),
        };

        let error = props["error"]["details"][0]["message"]
            .as_str()
            .or_else(|| props["error"]["message"].as_str())
            .map(String::from);

        Self {
            provisioning_state: props["provisioningState"]
                .as_str()
                .unwrap_or("Unknown")
                .to_string(),
            error,
            vm_names,
            output_resources,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.provisioning_state.eq_ignore_ascii_case("Succeeded")
    }

    pub fn is_failed(&self) -> bool {
        self.provisioning_state.eq_ignore_ascii_case("Failed")
            || self.provisioning_state.eq_ignore_ascii_case("Canceled")
    }
}

/// Sort resources into dependency order for deletion. Child resources go
/// with their parents and duplicates are dropped; unknown types go last.
pub fn deletion_order(resources: Vec<ResourceId>) -> Vec<ResourceId> {
    let mut seen = HashSet::new();
    let mut ordered: Vec<ResourceId> = resources
        .into_iter()
        .filter(|id| !id.is_child())
        .filter(|id| seen.insert(id.to_string().to_ascii_lowercase()))
        .collect();

    ordered.sort_by_key(|id| {
        DELETION_ORDER
            .iter()
            .position(|t| id.is_type(t))
            .unwrap_or(DELETION_ORDER.len())
    });
    ordered
}

enum Probe {
    Settled(ClusterState, Vec<VmInstance>),
    Pending(String),
}

/// A deployed VM or cluster of VMs
pub struct VmCluster {
    client: Arc<dyn ResourceManager>,
    group: ResourceGroupRef,
    name: String,
    state: ClusterState,
    instances: Vec<VmInstance>,
    wait: WaitPolicy,
}

impl VmCluster {
    /// Attach to an existing deployment. A deployment that does not exist is
    /// an error; one that is still provisioning yields a wrapper in the
    /// [`ClusterState::DeploymentInProgress`] state.
    pub async fn lookup(
        client: Arc<dyn ResourceManager>,
        group: ResourceGroupRef,
        name: impl Into<String>,
    ) -> Result<Self, ClusterError> {
        Self::lookup_with_policy(client, group, name, WaitPolicy::default()).await
    }

    pub async fn lookup_with_policy(
        client: Arc<dyn ResourceManager>,
        group: ResourceGroupRef,
        name: impl Into<String>,
        wait: WaitPolicy,
    ) -> Result<Self, ClusterError> {
        let mut cluster = Self {
            client,
            group,
            name: name.into(),
            state: ClusterState::DeploymentInProgress,
            instances: Vec::new(),
            wait,
        };
        cluster.initialize().await?;
        Ok(cluster)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &ResourceGroupRef {
        &self.group
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn instances(&self) -> &[VmInstance] {
        &self.instances
    }

    fn deployment_path(&self) -> String {
        self.group.deployment_path(&self.name)
    }

    async fn probe(&self) -> Result<Probe, ClusterError> {
        let body = match self
            .client
            .get(&self.deployment_path(), api_versions::RESOURCES)
            .await
        {
            Ok(body) => body,
            Err(e) if e.is_not_found() => {
                return Err(ClusterError::DeploymentNotFound(self.name.clone()))
            }
            Err(e) => return Ok(Probe::Pending(e.to_string())),
        };

        let record = DeploymentRecord::parse(&body);
        if record.is_failed() {
            let message = record
                .error
                .unwrap_or_else(|| format!("provisioning state {}", record.provisioning_state));
            return Ok(Probe::Settled(ClusterState::DeploymentFailed(message), Vec::new()));
        }
        if !record.is_succeeded() {
            return Ok(Probe::Pending(format!(
                "provisioning state {}",
                record.provisioning_state
            )));
        }

        let mut instances = Vec::with_capacity(record.vm_names.len());
        for vm in &record.vm_names {
            match VmInstance::fetch(self.client.as_ref(), &self.group.vm_path(vm)).await {
                Ok(instance) => instances.push(instance),
                Err(e) => return Ok(Probe::Pending(format!("VM {}: {}", vm, e))),
            }
        }
        Ok(Probe::Settled(ClusterState::Ready, instances))
    }

    /// Materialize instances, retrying once before settling on
    /// [`ClusterState::DeploymentInProgress`].
    async fn initialize(&mut self) -> Result<(), ClusterError> {
        for attempt in 1..=INIT_ATTEMPTS {
            match self.probe().await? {
                Probe::Settled(state, instances) => {
                    debug!(
                        "Deployment {} settled as {:?} with {} instance(s)",
                        self.name,
                        state,
                        instances.len()
                    );
                    self.state = state;
                    self.instances = instances;
                    return Ok(());
                }
                Probe::Pending(reason) if attempt < INIT_ATTEMPTS => {
                    warn!("Deployment {} not ready ({}), retrying", self.name, reason);
                }
                Probe::Pending(reason) => {
                    info!("Deployment {} is still in progress: {}", self.name, reason);
                }
            }
        }
        self.state = ClusterState::DeploymentInProgress;
        self.instances.clear();
        Ok(())
    }

    fn is_materialized(&self) -> bool {
        self.state == ClusterState::Ready && !self.instances.is_empty()
    }

    /// `true` when lifecycle calls can proceed
    async fn ensure_ready(&mut self) -> Result<bool, ClusterError> {
        if !self.is_materialized() {
            self.initialize().await?;
        }
        match &self.state {
            ClusterState::Ready => Ok(true),
            ClusterState::DeploymentInProgress => Ok(false),
            ClusterState::DeploymentFailed(message) => {
                Err(ClusterError::DeploymentFailed(message.clone()))
            }
        }
    }

    /// Refresh every instance and report the cluster state
    pub async fn sync_status(&mut self) -> Result<ClusterState, ClusterError> {
        if !self.is_materialized() {
            self.initialize().await?;
            return Ok(self.state.clone());
        }
        for instance in &mut self.instances {
            instance.refresh(self.client.as_ref()).await?;
        }
        Ok(self.state.clone())
    }

    async fn wait_for_power(
        &self,
        instance: &VmInstance,
        targets: &[PowerState],
    ) -> Result<(), ClusterError> {
        for attempt in 1..=self.wait.max_attempts {
            let (power, _) = instance.fetch_instance_view(self.client.as_ref()).await?;
            if targets.contains(&power) {
                return Ok(());
            }
            debug!(
                "VM {} is {} (attempt {}/{})",
                instance.name, power, attempt, self.wait.max_attempts
            );
            tokio::time::sleep(self.wait.interval).await;
        }
        Err(ClusterError::WaitTimeout(format!(
            "VM {} to reach {:?}",
            instance.name, targets
        )))
    }

    async fn wait_all(&self, targets: &[PowerState]) -> Result<(), ClusterError> {
        for instance in &self.instances {
            self.wait_for_power(instance, targets).await?;
        }
        Ok(())
    }

    async fn wait_until_gone(&self, id: &ResourceId) -> Result<(), ClusterError> {
        let path = id.to_string();
        for _ in 0..self.wait.max_attempts {
            match self.client.get(&path, id.api_version()).await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
                Ok(_) => tokio::time::sleep(self.wait.interval).await,
            }
        }
        Err(ClusterError::WaitTimeout(format!("{} to be deleted", id.name())))
    }

    pub async fn start(&mut self, wait: bool) -> Result<ActionOutcome, ClusterError> {
        if !self.ensure_ready().await? {
            return Ok(ActionOutcome::DeploymentInProgress);
        }
        for instance in &self.instances {
            instance.start(self.client.as_ref()).await?;
        }
        if wait {
            self.wait_all(&[PowerState::Running]).await?;
        }
        self.sync_status().await?;
        Ok(ActionOutcome::Applied(self.instances.len()))
    }

    pub async fn stop(&mut self, deallocate: bool, wait: bool) -> Result<ActionOutcome, ClusterError> {
        if !self.ensure_ready().await? {
            return Ok(ActionOutcome::DeploymentInProgress);
        }
        for instance in &self.instances {
            instance.stop(self.client.as_ref(), deallocate).await?;
        }
        if wait {
            let target = if deallocate {
                PowerState::Deallocated
            } else {
                PowerState::Stopped
            };
            self.wait_all(&[target]).await?;
        }
        self.sync_status().await?;
        Ok(ActionOutcome::Applied(self.instances.len()))
    }

    pub async fn restart(&mut self, wait: bool) -> Result<ActionOutcome, ClusterError> {
        if !self.ensure_ready().await? {
            return Ok(ActionOutcome::DeploymentInProgress);
        }
        for instance in &self.instances {
            instance.restart(self.client.as_ref()).await?;
        }
        if wait {
            self.wait_all(&[PowerState::Running]).await?;
        }
        self.sync_status().await?;
        Ok(ActionOutcome::Applied(self.instances.len()))
    }

    /// Change the VM size of every instance. With `deallocate` each VM is
    /// deallocated first and started again afterwards, which allows moving
    /// to sizes its current host cannot offer.
    pub async fn resize(
        &mut self,
        size: &str,
        deallocate: bool,
        wait: bool,
    ) -> Result<ActionOutcome, ClusterError> {
        if size.trim().is_empty() {
            return Err(ClusterError::InvalidSize);
        }
        if !self.ensure_ready().await? {
            return Ok(ActionOutcome::DeploymentInProgress);
        }
        for instance in &self.instances {
            if deallocate {
                instance.stop(self.client.as_ref(), true).await?;
                self.wait_for_power(instance, &[PowerState::Deallocated])
                    .await?;
            }
            instance.resize(self.client.as_ref(), size).await?;
            if deallocate {
                instance.start(self.client.as_ref()).await?;
            }
        }
        if wait {
            self.wait_all(&[PowerState::Running]).await?;
        }
        self.sync_status().await?;
        Ok(ActionOutcome::Applied(self.instances.len()))
    }

    /// Run a script on one instance, or on all of them when `instance` is
    /// `None`. Returns what the script printed on each VM.
    pub async fn run_script(
        &mut self,
        script: &str,
        instance: Option<usize>,
    ) -> Result<(ActionOutcome, Vec<ScriptOutput>), ClusterError> {
        if !self.ensure_ready().await? {
            return Ok((ActionOutcome::DeploymentInProgress, Vec::new()));
        }
        let targets: Vec<&VmInstance> = match instance {
            Some(i) => {
                let vm = self
                    .instances
                    .get(i)
                    .ok_or(ClusterError::NoSuchInstance(i, self.instances.len()))?;
                vec![vm]
            }
            None => self.instances.iter().collect(),
        };
        let mut outputs = Vec::with_capacity(targets.len());
        for vm in &targets {
            let response = vm.run_script(self.client.as_ref(), script).await?;
            debug!("runCommand on {} returned {}", vm.name, response);
            outputs.push(ScriptOutput {
                instance: vm.name.clone(),
                output: script_output_text(&response),
            });
        }
        self.sync_status().await?;
        Ok((ActionOutcome::Applied(outputs.len()), outputs))
    }

    /// A VM followed by the managed disks attached to it, or nothing when the
    /// VM does not exist. OS disks are created implicitly and never listed
    /// as deployment outputs.
    async fn vm_with_disks(&self, vm: &ResourceId) -> Result<Vec<ResourceId>, ClusterError> {
        let body = match self.client.get(&vm.to_string(), vm.api_version()).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let parsed = parse_vm(&body)?;
        let disks = parsed
            .os_disk
            .iter()
            .chain(&parsed.data_disks)
            .filter_map(|d| d.id.as_deref())
            .filter_map(|id| ResourceId::parse(id).ok());
        Ok(std::iter::once(vm.clone()).chain(disks).collect())
    }

    /// Delete the deployment. With `free_resources` every resource it
    /// created is deleted first, VMs before the disks and network
    /// resources they hold.
    pub async fn delete(self, free_resources: bool) -> Result<(), ClusterError> {
        let deployment = self.deployment_path();

        if free_resources {
            let record = match self.client.get(&deployment, api_versions::RESOURCES).await {
                Ok(body) => Some(DeploymentRecord::parse(&body)),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            let mut resources = record
                .as_ref()
                .map(|r| r.output_resources.clone())
                .unwrap_or_default();

            // a failed or unfinished deployment has no materialized
            // instances, but may still have created VMs
            let mut vms: Vec<ResourceId> = resources
                .iter()
                .filter(|id| id.is_type(VM_TYPE))
                .cloned()
                .collect();
            for name in record.iter().flat_map(|r| &r.vm_names) {
                vms.push(ResourceId::parse(&self.group.vm_path(name))?);
            }
            vms.extend(self.instances.iter().map(|i| i.id.clone()));

            for vm in deletion_order(vms) {
                resources.extend(self.vm_with_disks(&vm).await?);
            }

            for id in deletion_order(resources) {
                info!("Deleting {} {}", id.full_type(), id.name());
                self.client
                    .delete(&id.to_string(), id.api_version())
                    .await
                    .map_err(ClusterError::from)?;
                self.wait_until_gone(&id).await?;
            }
        }

        info!("Deleting deployment {}", self.name);
        match self.client.delete(&deployment, api_versions::RESOURCES).await {
            Ok(()) => Ok(()),
            Err(ClientError::Api { status: 404, .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
