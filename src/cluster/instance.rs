//! One virtual machine of a deployment.

use std::fmt;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::{api_versions, ClientError, ResourceId, ResourceManager};

/// Power state from the VM's instance view (`PowerState/<state>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deallocating,
    Deallocated,
    Unknown(String),
}

impl PowerState {
    pub fn from_code(code: &str) -> Self {
        let state = code.strip_prefix("PowerState/").unwrap_or(code);
        match state.to_ascii_lowercase().as_str() {
            "starting" => PowerState::Starting,
            "running" => PowerState::Running,
            "stopping" => PowerState::Stopping,
            "stopped" => PowerState::Stopped,
            "deallocating" => PowerState::Deallocating,
            "deallocated" => PowerState::Deallocated,
            _ => PowerState::Unknown(state.to_string()),
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Starting => f.write_str("starting"),
            PowerState::Running => f.write_str("running"),
            PowerState::Stopping => f.write_str("stopping"),
            PowerState::Stopped => f.write_str("stopped"),
            PowerState::Deallocating => f.write_str("deallocating"),
            PowerState::Deallocated => f.write_str("deallocated"),
            PowerState::Unknown(s) => f.write_str(s),
        }
    }
}

/// OS or data disk attached to a VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub name: String,
    pub lun: Option<u32>,
    pub size_gb: Option<u32>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmInstance {
    pub name: String,
    pub id: ResourceId,
    pub size: String,
    pub location: String,
    /// `Linux` or `Windows`
    pub os_type: String,
    pub power_state: PowerState,
    pub provisioning_state: String,
    pub os_disk: Option<DiskInfo>,
    pub data_disks: Vec<DiskInfo>,
    pub nic_ids: Vec<ResourceId>,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub fqdn: Option<String>,
}

// ============================================================================
// SBIO: Pure parsing of provider responses
// ============================================================================

fn parse_disk(value: &Value) -> Option<DiskInfo> {
    Some(DiskInfo {
        name: value.get("name")?.as_str()?.to_string(),
        lun: value.get("lun").and_then(Value::as_u64).map(|l| l as u32),
        size_gb: value
            .get("diskSizeGB")
            .and_then(Value::as_u64)
            .map(|s| s as u32),
        id: value["managedDisk"]["id"].as_str().map(String::from),
    })
}

/// Text of a `runCommand` response: the message of every status entry,
/// which carries the script's `[stdout]` and `[stderr]` sections.
pub fn script_output_text(response: &Value) -> String {
    match response["value"].as_array() {
        Some(statuses) => statuses
            .iter()
            .filter_map(|s| s["message"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        None if response.is_null() => String::new(),
        None => response.to_string(),
    }
}

/// Build an instance from a `virtualMachines` GET body. Network and power
/// fields are left empty until [`VmInstance::refresh`].
pub fn parse_vm(value: &Value) -> Result<VmInstance, ClientError> {
    let raw_id = value["id"]
        .as_str()
        .ok_or_else(|| ClientError::Parse("VM has no id".to_string()))?;
    let id = ResourceId::parse(raw_id)?;
    let props = &value["properties"];
    let storage = &props["storageProfile"];

    let nic_ids = props["networkProfile"]["networkInterfaces"]
        .as_array()
        .map(|nics| {
            nics.iter()
                .filter_map(|n| n["id"].as_str())
                .filter_map(|id| ResourceId::parse(id).ok())
                .collect()
        })
        .unwrap_or_default();

    Ok(VmInstance {
        name: id.name().to_string(),
        size: props["hardwareProfile"]["vmSize"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        location: value["location"].as_str().unwrap_or_default().to_string(),
        os_type: storage["osDisk"]["osType"]
            .as_str()
            .unwrap_or("Linux")
            .to_string(),
        power_state: PowerState::Unknown("unknown".to_string()),
        provisioning_state: props["provisioningState"]
            .as_str()
            .unwrap_or("Unknown")
            .to_string(),
        os_disk: parse_disk(&storage["osDisk"]),
        data_disks: storage["dataDisks"]
            .as_array()
            .map(|disks| disks.iter().filter_map(parse_disk).collect())
            .unwrap_or_default(),
        nic_ids,
        private_ip: None,
        public_ip: None,
        fqdn: None,
        id,
    })
}

/// `(power state, provisioning state)` from an instance view
pub fn parse_instance_view(value: &Value) -> (PowerState, Option<String>) {
    let mut power = PowerState::Unknown("unknown".to_string());
    let mut provisioning = None;
    for status in value["statuses"].as_array().into_iter().flatten() {
        let Some(code) = status["code"].as_str() else {
            continue;
        };
        if code.starts_with("PowerState/") {
            power = PowerState::from_code(code);
        } else if let Some(state) = code.strip_prefix("ProvisioningState/") {
            let mut chars = state.chars();
            provisioning = chars
                .next()
                .map(|c| c.to_ascii_uppercase().to_string() + chars.as_str());
        }
    }
    (power, provisioning)
}

/// `(private ip, public ip resource id)` from a NIC
pub fn parse_nic(value: &Value) -> (Option<String>, Option<String>) {
    let config = &value["properties"]["ipConfigurations"][0]["properties"];
    (
        config["privateIPAddress"].as_str().map(String::from),
        config["publicIPAddress"]["id"].as_str().map(String::from),
    )
}

/// `(address, fqdn)` from a public IP address resource
pub fn parse_public_ip(value: &Value) -> (Option<String>, Option<String>) {
    let props = &value["properties"];
    (
        props["ipAddress"].as_str().map(String::from),
        props["dnsSettings"]["fqdn"].as_str().map(String::from),
    )
}

// ============================================================================
// SBIO: I/O - queries and actions
// ============================================================================

impl VmInstance {
    /// Query a VM and everything hanging off it
    pub async fn fetch(client: &dyn ResourceManager, vm_path: &str) -> Result<Self, ClientError> {
        let body = client.get(vm_path, api_versions::COMPUTE).await?;
        let mut instance = parse_vm(&body)?;
        instance.refresh_runtime(client).await?;
        Ok(instance)
    }

    pub fn path(&self) -> String {
        self.id.to_string()
    }

    pub fn is_running(&self) -> bool {
        self.power_state == PowerState::Running
    }

    pub fn is_windows(&self) -> bool {
        self.os_type.eq_ignore_ascii_case("windows")
    }

    /// Re-read the VM body, power state and addresses
    pub async fn refresh(&mut self, client: &dyn ResourceManager) -> Result<(), ClientError> {
        *self = Self::fetch(client, &self.path()).await?;
        Ok(())
    }

    async fn refresh_runtime(&mut self, client: &dyn ResourceManager) -> Result<(), ClientError> {
        let (power, provisioning) = self.fetch_instance_view(client).await?;
        self.power_state = power;
        if let Some(state) = provisioning {
            self.provisioning_state = state;
        }

        if let Some(nic) = self.nic_ids.first() {
            let nic_body = client.get(&nic.to_string(), nic.api_version()).await?;
            let (private_ip, pip_id) = parse_nic(&nic_body);
            self.private_ip = private_ip;

            if let Some(pip_id) = pip_id {
                let pip_body = client.get(&pip_id, api_versions::NETWORK).await?;
                let (address, fqdn) = parse_public_ip(&pip_body);
                self.public_ip = address;
                self.fqdn = fqdn;
            }
        }
        Ok(())
    }

    pub async fn fetch_instance_view(
        &self,
        client: &dyn ResourceManager,
    ) -> Result<(PowerState, Option<String>), ClientError> {
        let path = format!("{}/instanceView", self.path());
        let view = client.get(&path, api_versions::COMPUTE).await?;
        Ok(parse_instance_view(&view))
    }

    async fn action(&self, client: &dyn ResourceManager, action: &str) -> Result<(), ClientError> {
        let path = format!("{}/{}", self.path(), action);
        client.post(&path, api_versions::COMPUTE, None).await?;
        Ok(())
    }

    pub async fn start(&self, client: &dyn ResourceManager) -> Result<(), ClientError> {
        info!("Starting VM {}", self.name);
        self.action(client, "start").await
    }

    /// Deallocating releases compute billing; powering off keeps the host
    pub async fn stop(&self, client: &dyn ResourceManager, deallocate: bool) -> Result<(), ClientError> {
        if deallocate {
            info!("Deallocating VM {}", self.name);
            self.action(client, "deallocate").await
        } else {
            info!("Powering off VM {}", self.name);
            self.action(client, "powerOff").await
        }
    }

    pub async fn restart(&self, client: &dyn ResourceManager) -> Result<(), ClientError> {
        info!("Restarting VM {}", self.name);
        self.action(client, "restart").await
    }

    pub async fn resize(&self, client: &dyn ResourceManager, size: &str) -> Result<(), ClientError> {
        info!("Resizing VM {} from {} to {}", self.name, self.size, size);
        let body = json!({"properties": {"hardwareProfile": {"vmSize": size}}});
        client.patch(&self.path(), api_versions::COMPUTE, &body).await?;
        Ok(())
    }

    /// Run a script through the guest agent; shell on Linux, PowerShell on Windows
    pub async fn run_script(&self, client: &dyn ResourceManager, script: &str) -> Result<Value, ClientError> {
        let command_id = if self.is_windows() {
            "RunPowerShellScript"
        } else {
            "RunShellScript"
        };
        info!("Running {} on VM {}", command_id, self.name);
        debug!("Script: {}", script);

        let body = json!({
            "commandId": command_id,
            "script": script.lines().collect::<Vec<_>>(),
        });
        let path = format!("{}/runCommand", self.path());
        client.post(&path, api_versions::COMPUTE, Some(&body)).await
    }
}
