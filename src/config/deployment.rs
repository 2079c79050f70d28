use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::disk::DataDiskConfig;
use super::image::{ImageConfig, OsType};
use super::secrets::SecretSource;
use super::user::{AuthType, UserConfig};

/// VM size used when a deployment file does not give one
pub const DEFAULT_VM_SIZE: &str = "Standard_DS3_v2";

/// Windows computer names are limited to 15 characters
const WINDOWS_NAME_MAX: usize = 15;

/// Azure resource names for VMs are limited to 64 characters
const VM_NAME_MAX: usize = 64;

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9-]{0,63}$").expect("static pattern"));

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{1,61}[a-z0-9]$").expect("static pattern"));

/// Errors that can occur while parsing and validating a deployment file
#[derive(Error, Debug, PartialEq)]
pub enum DeploymentError {
    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Invalid deployment name '{0}': use letters, digits and '-', starting with a letter (max 64)")]
    InvalidName(String),

    #[error("Windows VM name '{0}' is too long: computer names are limited to 15 characters")]
    WindowsNameTooLong(String),

    #[error("Cluster size must be at least 1")]
    EmptyCluster,

    #[error("Windows VMs require password authentication")]
    WindowsRequiresPassword,

    #[error("Extension has no command to execute")]
    EmptyExtensionCommand,

    #[error("Invalid DNS label '{0}': lowercase letters, digits and '-', 3-63 characters ending in a letter or digit, with room for the instance index")]
    InvalidDnsLabel(String),
}

/// Custom script run on each VM after provisioning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionConfig {
    /// Files downloaded onto the VM before the command runs
    #[serde(default)]
    pub file_uris: Vec<String>,
    pub command: String,
}

/// One deployment: the contents of a deployment file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeploymentSpec {
    pub name: String,

    /// Overrides the context's resource group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    /// Overrides the context's location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    pub os: OsType,

    #[serde(default = "default_vm_size")]
    pub size: String,

    #[serde(default = "default_cluster_size")]
    pub cluster_size: u32,

    pub user: UserConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,

    #[serde(default)]
    pub datadisks: Vec<DataDiskConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<ExtensionConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_label: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub secrets: HashMap<String, SecretSource>,
}

fn default_vm_size() -> String {
    DEFAULT_VM_SIZE.to_string()
}

fn default_cluster_size() -> u32 {
    1
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Strip `//` and `/* */` comments outside of string literals.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            result.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some('/')) => {
                for nc in chars.by_ref() {
                    if nc == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for nc in chars.by_ref() {
                    if prev == '*' && nc == '/' {
                        break;
                    }
                    prev = nc;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

/// Parse JSONC into an untyped document, before secret substitution.
pub fn parse_document(content: &str) -> Result<serde_json::Value, DeploymentError> {
    serde_json::from_str(&strip_jsonc_comments(content))
        .map_err(|e| DeploymentError::ParseError(e.to_string()))
}

/// Check cross-field rules that the field builders cannot see.
pub fn validate_deployment(spec: &DeploymentSpec) -> Result<(), DeploymentError> {
    if !NAME.is_match(&spec.name) {
        return Err(DeploymentError::InvalidName(spec.name.clone()));
    }

    if spec.cluster_size == 0 {
        return Err(DeploymentError::EmptyCluster);
    }

    let longest = spec.name.len() + spec.index_suffix_width();
    if longest > VM_NAME_MAX {
        return Err(DeploymentError::InvalidName(spec.name.clone()));
    }

    if spec.os.is_windows() {
        if spec.user.auth_type() == AuthType::Key {
            return Err(DeploymentError::WindowsRequiresPassword);
        }
        if longest > WINDOWS_NAME_MAX {
            return Err(DeploymentError::WindowsNameTooLong(spec.name.clone()));
        }
    }

    if let Some(ext) = &spec.extension {
        if ext.command.trim().is_empty() {
            return Err(DeploymentError::EmptyExtensionCommand);
        }
    }

    // cluster public IPs take the instance index as a suffix
    let label = spec.effective_dns_label();
    let widest = format!("{}{}", label, "0".repeat(spec.index_suffix_width()));
    if !DNS_LABEL.is_match(&label) || !DNS_LABEL.is_match(&widest) {
        return Err(DeploymentError::InvalidDnsLabel(label));
    }

    Ok(())
}

impl DeploymentSpec {
    /// Parse and validate from a JSONC string.
    pub fn from_str(content: &str) -> Result<Self, DeploymentError> {
        Self::from_value(parse_document(content)?)
    }

    /// Deserialize and validate an already-parsed document.
    pub fn from_value(document: serde_json::Value) -> Result<Self, DeploymentError> {
        let spec: DeploymentSpec = serde_json::from_value(document)
            .map_err(|e| DeploymentError::ParseError(e.to_string()))?;
        validate_deployment(&spec)?;
        Ok(spec)
    }

    pub fn auth_type(&self) -> AuthType {
        self.user.auth_type()
    }

    /// Image to boot from: the explicit one, else the OS default
    pub fn effective_image(&self) -> ImageConfig {
        self.image
            .clone()
            .unwrap_or_else(|| self.os.default_image())
    }

    pub fn is_cluster(&self) -> bool {
        self.cluster_size > 1
    }

    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    /// DNS label prefix for public IPs: explicit, else the lowercased name
    pub fn effective_dns_label(&self) -> String {
        self.dns_label
            .clone()
            .unwrap_or_else(|| self.name.to_ascii_lowercase())
    }

    /// Characters the instance index adds to each name; zero for a single VM
    pub fn index_suffix_width(&self) -> usize {
        if self.is_cluster() {
            (self.cluster_size - 1).to_string().len()
        } else {
            0
        }
    }

    /// Names of the VMs this deployment creates
    pub fn instance_names(&self) -> Vec<String> {
        if self.is_cluster() {
            (0..self.cluster_size)
                .map(|i| format!("{}{}", self.name, i))
                .collect()
        } else {
            vec![self.name.clone()]
        }
    }
}
