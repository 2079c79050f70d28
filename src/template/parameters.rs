//! Template parameter values for a deployment.

use serde_json::{json, Map, Value};
use tracing::debug;

use super::TemplateError;
use crate::client::ResourceGroupRef;
use crate::config::secrets::MASK;
use crate::config::{disambiguate_disk_names, DataDiskConfig, DeploymentSpec};

/// Admin credential with any key resource already fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLogin {
    SshKey(String),
    Password(String),
}

/// Raw parameter values keyed by template parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateParameters {
    values: Map<String, Value>,
}

/// Attach specs and standalone disk resources for one VM
fn vm_disks(
    group: &ResourceGroupRef,
    vm_name: &str,
    disks: &[DataDiskConfig],
) -> (Vec<Value>, Vec<Value>) {
    let names = disambiguate_disk_names(Some(vm_name), disks);
    let mut attach = Vec::with_capacity(disks.len());
    let mut resources = Vec::new();

    for (lun, (disk, name)) in disks.iter().zip(&names).enumerate() {
        let id = disk
            .is_standalone()
            .then(|| group.resource_path("Microsoft.Compute/disks", name));
        attach.push(json!(disk.vm_spec(lun as u32, name, id)));
        if let Some(resource) = disk.resource_spec(name) {
            resources.push(json!(resource));
        }
    }
    (attach, resources)
}

impl TemplateParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values for every parameter the packaged templates declare
    pub fn build(
        spec: &DeploymentSpec,
        group: &ResourceGroupRef,
        location: &str,
        login: &ResolvedLogin,
    ) -> Self {
        let mut params = Self::new();
        params.insert("vmName", json!(spec.name));
        params.insert("vmSize", json!(spec.size));
        params.insert("location", json!(location));
        params.insert("adminUsername", json!(spec.user.username()));
        match login {
            ResolvedLogin::SshKey(key) => params.insert("sshKeyData", json!(key)),
            ResolvedLogin::Password(pw) => params.insert("adminPassword", json!(pw)),
        }
        params.insert("imageReference", spec.effective_image().image_reference());
        params.insert("dnsLabelPrefix", json!(spec.effective_dns_label()));

        if spec.is_cluster() {
            let mut per_instance = Vec::new();
            let mut all_resources = Vec::new();
            for instance in spec.instance_names() {
                let (attach, resources) = vm_disks(group, &instance, &spec.datadisks);
                per_instance.push(Value::Array(attach));
                all_resources.extend(resources);
            }
            params.insert("instanceCount", json!(spec.cluster_size));
            params.insert("dataDisks", Value::Array(per_instance));
            params.insert("diskResources", Value::Array(all_resources));
        } else {
            let (attach, resources) = vm_disks(group, &spec.name, &spec.datadisks);
            params.insert("dataDisks", Value::Array(attach));
            params.insert("diskResources", Value::Array(resources));
        }

        if let Some(ext) = &spec.extension {
            params.insert("fileUris", json!(ext.file_uris));
            params.insert("commandToExecute", json!(ext.command));
        }

        params
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Match supplied values against the template's declared parameters and
/// wrap them as `{"name": {"value": ...}}`. Declared parameters without a
/// `defaultValue` must be supplied; undeclared ones are dropped.
pub fn resolve_parameters(
    template: &Value,
    params: &TemplateParameters,
) -> Result<Map<String, Value>, TemplateError> {
    let empty = Map::new();
    let declared = template
        .get("parameters")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut resolved = Map::new();
    for (name, decl) in declared {
        match params.get(name) {
            Some(value) => {
                resolved.insert(name.clone(), json!({ "value": value }));
            }
            None if decl.get("defaultValue").is_some() => {}
            None => return Err(TemplateError::MissingParameter(name.clone())),
        }
    }

    for name in params.names().filter(|n| !declared.contains_key(*n)) {
        debug!("Dropping parameter '{}': not declared by template", name);
    }

    Ok(resolved)
}

/// Copy of resolved parameters with `securestring`/`secureobject` values masked
pub fn mask_secure_parameters(template: &Value, resolved: &Map<String, Value>) -> Map<String, Value> {
    resolved
        .iter()
        .map(|(name, value)| {
            let secure = template["parameters"][name]["type"]
                .as_str()
                .is_some_and(|t| t.to_ascii_lowercase().starts_with("secure"));
            if secure {
                (name.clone(), json!({ "value": MASK }))
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
