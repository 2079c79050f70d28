pub mod deployment;
pub mod disk;
pub mod image;
pub mod secrets;
pub mod user;

pub use deployment::{
    parse_document, strip_jsonc_comments, validate_deployment, DeploymentError, DeploymentSpec,
    ExtensionConfig, DEFAULT_VM_SIZE,
};
pub use disk::{
    disambiguate_disk_names, sanitize_disk_name, DataDiskConfig, DiskCreateMode, DiskSku,
};
pub use image::{ImageConfig, MarketplaceImage, OsType};
pub use secrets::{SecretError, SecretSource, SecretsManager};
pub use user::{AuthType, Login, SshKey, SshKeySource, UserConfig};

use std::path::Path;
use thiserror::Error;

/// Invalid combinations of user-supplied options, raised by the builders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid username '{0}'")]
    InvalidUsername(String),

    #[error("User needs either an SSH key or a password")]
    MissingCredential,

    #[error("User cannot have both an SSH key and a password")]
    ConflictingCredential,

    #[error("Invalid SSH public key: {0}")]
    InvalidSshKey(String),

    #[error("Failed to read key file {0}: {1}")]
    KeyFile(String, String),

    #[error("Data disk '{0}' is blank and needs a size")]
    MissingDiskSize(String),

    #[error("Data disk '{0}' has an invalid size")]
    InvalidDiskSize(String),

    #[error("Data disk '{0}': write accelerator requires Premium_LRS")]
    WriteAcceleratorRequiresPremium(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Deployment error: {0}")]
    DeploymentError(#[from] DeploymentError),

    #[error("Secret error: {0}")]
    SecretError(#[from] SecretError),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load a deployment file from disk, resolving `$secrets` references from
/// the sources it declares before the typed parse.
pub async fn load_deployment_file(path: &Path) -> Result<DeploymentSpec, LoadError> {
    let content = tokio::fs::read_to_string(path).await?;
    let document = parse_document(&content)?;

    let sources: std::collections::HashMap<String, SecretSource> = document
        .get("secrets")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| DeploymentError::ParseError(format!("secrets: {}", e)))?
        .unwrap_or_default();

    let secrets = SecretsManager::new();
    secrets.load_all(&sources).await?;
    secrets.check_references(&document)?;

    Ok(DeploymentSpec::from_value(secrets.substitute_value(&document))?)
}
