//! ARM resource paths and ids.

use std::fmt;

use super::ClientError;

/// API versions used per resource provider
pub mod api_versions {
    pub const RESOURCES: &str = "2022-09-01";
    pub const COMPUTE: &str = "2023-09-01";
    pub const DISKS: &str = "2023-04-02";
    pub const NETWORK: &str = "2023-09-01";
}

/// A resource group within a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroupRef {
    pub subscription_id: String,
    pub resource_group: String,
}

impl ResourceGroupRef {
    pub fn new(subscription_id: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
        }
    }

    pub fn path(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )
    }

    /// Path of a top-level resource, e.g. `("Microsoft.Compute/disks", "d1")`
    pub fn resource_path(&self, full_type: &str, name: &str) -> String {
        format!("{}/providers/{}/{}", self.path(), full_type, name)
    }

    pub fn deployment_path(&self, name: &str) -> String {
        self.resource_path("Microsoft.Resources/deployments", name)
    }

    pub fn vm_path(&self, name: &str) -> String {
        self.resource_path("Microsoft.Compute/virtualMachines", name)
    }
}

impl fmt::Display for ResourceGroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subscription_id, self.resource_group)
    }
}

/// Parsed ARM resource id:
/// `/subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/{type}/{name}[/{child-type}/{child-name}]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub namespace: String,
    /// Type segments, e.g. `["virtualMachines", "extensions"]`
    pub types: Vec<String>,
    /// Name segments, one per type segment
    pub names: Vec<String>,
}

impl ResourceId {
    pub fn parse(id: &str) -> Result<Self, ClientError> {
        let invalid = || ClientError::InvalidResourceId(id.to_string());
        let segments: Vec<&str> = id.trim_matches('/').split('/').collect();

        if segments.len() < 8 || segments.len() % 2 != 0 {
            return Err(invalid());
        }
        if !segments[0].eq_ignore_ascii_case("subscriptions")
            || !segments[2].eq_ignore_ascii_case("resourceGroups")
            || !segments[4].eq_ignore_ascii_case("providers")
        {
            return Err(invalid());
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid());
        }

        let rest = &segments[6..];
        Ok(Self {
            subscription_id: segments[1].to_string(),
            resource_group: segments[3].to_string(),
            namespace: segments[5].to_string(),
            types: rest.iter().step_by(2).map(|s| s.to_string()).collect(),
            names: rest.iter().skip(1).step_by(2).map(|s| s.to_string()).collect(),
        })
    }

    /// `Microsoft.Compute/virtualMachines/extensions`
    pub fn full_type(&self) -> String {
        format!("{}/{}", self.namespace, self.types.join("/"))
    }

    /// Name of the innermost resource
    pub fn name(&self) -> &str {
        self.names.last().map(String::as_str).unwrap_or_default()
    }

    pub fn is_type(&self, full_type: &str) -> bool {
        self.full_type().eq_ignore_ascii_case(full_type)
    }

    pub fn is_child(&self) -> bool {
        self.types.len() > 1
    }

    /// API version to use for this resource's provider
    pub fn api_version(&self) -> &'static str {
        let namespace = self.namespace.to_ascii_lowercase();
        let top = self.types.first().map(|t| t.to_ascii_lowercase());
        match (namespace.as_str(), top.as_deref()) {
            ("microsoft.compute", Some("disks")) => api_versions::DISKS,
            ("microsoft.compute", _) => api_versions::COMPUTE,
            ("microsoft.network", _) => api_versions::NETWORK,
            _ => api_versions::RESOURCES,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}",
            self.subscription_id, self.resource_group, self.namespace
        )?;
        for (t, n) in self.types.iter().zip(&self.names) {
            write!(f, "/{}/{}", t, n)?;
        }
        Ok(())
    }
}
