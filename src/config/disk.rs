//! Data disk layout.
//!
//! A [`DataDiskConfig`] yields two shapes: the entry placed in a VM's
//! `storageProfile.dataDisks` array, and (for blank disks) a standalone
//! `Microsoft.Compute/disks` resource that the VM then attaches.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Maximum length of a managed disk name
pub const MAX_DISK_NAME_LEN: usize = 80;

/// Name used when none (or nothing usable) is given
pub const DEFAULT_DISK_NAME: &str = "datadisk";

/// Storage SKU of a managed disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DiskSku {
    #[default]
    #[serde(rename = "StandardSSD_LRS")]
    StandardSsd,
    #[serde(rename = "Premium_LRS")]
    Premium,
    #[serde(rename = "Standard_LRS")]
    StandardHdd,
    #[serde(rename = "UltraSSD_LRS")]
    UltraSsd,
}

impl DiskSku {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskSku::StandardSsd => "StandardSSD_LRS",
            DiskSku::Premium => "Premium_LRS",
            DiskSku::StandardHdd => "Standard_LRS",
            DiskSku::UltraSsd => "UltraSSD_LRS",
        }
    }

    /// Host caching mode for a disk of this SKU
    pub fn caching(&self) -> &'static str {
        match self {
            DiskSku::Premium => "ReadOnly",
            _ => "None",
        }
    }
}

/// How a data disk is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DiskCreateMode {
    /// Blank disk, created as its own resource and attached
    #[default]
    Empty,
    /// Disk defined by the VM image
    FromImage,
}

/// Validated data-disk settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDataDisk", into = "RawDataDisk")]
pub struct DataDiskConfig {
    size_gb: Option<u32>,
    name: String,
    create: DiskCreateMode,
    sku: DiskSku,
    write_accelerator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawDataDisk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u32>,
    #[serde(default = "default_disk_name")]
    name: String,
    #[serde(default)]
    create: DiskCreateMode,
    #[serde(default, rename = "type")]
    sku: DiskSku,
    #[serde(default)]
    write_accelerator: bool,
}

fn default_disk_name() -> String {
    DEFAULT_DISK_NAME.to_string()
}

/// Entry for a VM's `storageProfile.dataDisks`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDiskSpec {
    pub lun: u32,
    pub name: String,
    pub create_option: &'static str,
    pub caching: &'static str,
    pub write_accelerator_enabled: bool,
    #[serde(rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<u32>,
    pub managed_disk: ManagedDiskRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDiskRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_account_type: Option<&'static str>,
}

/// Standalone `Microsoft.Compute/disks` resource body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskResourceSpec {
    pub name: String,
    pub sku: SkuName,
    pub properties: DiskResourceProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkuName {
    pub name: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskResourceProperties {
    #[serde(rename = "diskSizeGB")]
    pub disk_size_gb: u32,
    pub creation_data: CreationData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationData {
    pub create_option: &'static str,
}

impl DataDiskConfig {
    pub fn new(
        size_gb: Option<u32>,
        name: impl Into<String>,
        create: DiskCreateMode,
        sku: DiskSku,
        write_accelerator: bool,
    ) -> Result<Self, ConfigError> {
        let name = name.into();

        match (create, size_gb) {
            (DiskCreateMode::Empty, None) => return Err(ConfigError::MissingDiskSize(name)),
            (_, Some(0)) => return Err(ConfigError::InvalidDiskSize(name)),
            _ => {}
        }
        if write_accelerator && sku != DiskSku::Premium {
            return Err(ConfigError::WriteAcceleratorRequiresPremium(name));
        }

        Ok(Self {
            size_gb,
            name,
            create,
            sku,
            write_accelerator,
        })
    }

    /// Blank disk of the given size with default name and SKU
    pub fn blank(size_gb: u32) -> Result<Self, ConfigError> {
        Self::new(
            Some(size_gb),
            DEFAULT_DISK_NAME,
            DiskCreateMode::Empty,
            DiskSku::default(),
            false,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size_gb(&self) -> Option<u32> {
        self.size_gb
    }

    pub fn sku(&self) -> DiskSku {
        self.sku
    }

    pub fn create_mode(&self) -> DiskCreateMode {
        self.create
    }

    /// Whether the disk needs its own resource before the VM can attach it
    pub fn is_standalone(&self) -> bool {
        self.create == DiskCreateMode::Empty
    }

    /// VM-attach shape. `disk_id` is the id of the standalone disk resource
    /// and is only used for blank disks.
    pub fn vm_spec(&self, lun: u32, disk_name: &str, disk_id: Option<String>) -> VmDiskSpec {
        match self.create {
            DiskCreateMode::Empty => VmDiskSpec {
                lun,
                name: disk_name.to_string(),
                create_option: "Attach",
                caching: self.sku.caching(),
                write_accelerator_enabled: self.write_accelerator,
                disk_size_gb: None,
                managed_disk: ManagedDiskRef {
                    id: disk_id,
                    storage_account_type: None,
                },
            },
            DiskCreateMode::FromImage => VmDiskSpec {
                lun,
                name: disk_name.to_string(),
                create_option: "FromImage",
                caching: self.sku.caching(),
                write_accelerator_enabled: self.write_accelerator,
                disk_size_gb: self.size_gb,
                managed_disk: ManagedDiskRef {
                    id: None,
                    storage_account_type: Some(self.sku.as_str()),
                },
            },
        }
    }

    /// Standalone-resource shape; `None` for disks that come from the image
    pub fn resource_spec(&self, disk_name: &str) -> Option<DiskResourceSpec> {
        if !self.is_standalone() {
            return None;
        }
        let size = self.size_gb?;
        Some(DiskResourceSpec {
            name: disk_name.to_string(),
            sku: SkuName {
                name: self.sku.as_str(),
            },
            properties: DiskResourceProperties {
                disk_size_gb: size,
                creation_data: CreationData {
                    create_option: "Empty",
                },
            },
        })
    }
}

impl TryFrom<RawDataDisk> for DataDiskConfig {
    type Error = ConfigError;

    fn try_from(raw: RawDataDisk) -> Result<Self, Self::Error> {
        DataDiskConfig::new(raw.size, raw.name, raw.create, raw.sku, raw.write_accelerator)
    }
}

impl From<DataDiskConfig> for RawDataDisk {
    fn from(disk: DataDiskConfig) -> Self {
        RawDataDisk {
            size: disk.size_gb,
            name: disk.name,
            create: disk.create,
            sku: disk.sku,
            write_accelerator: disk.write_accelerator,
        }
    }
}

// ============================================================================
// Disk naming
// ============================================================================

/// Coerce a string into a valid managed disk name: only alphanumerics,
/// `_`, `-` and `.`; starts with an alphanumeric; ends with an alphanumeric
/// or `_`; at most [`MAX_DISK_NAME_LEN`] characters.
pub fn sanitize_disk_name(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = mapped.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    let truncated: String = trimmed.chars().take(MAX_DISK_NAME_LEN).collect();
    let cleaned = truncated.trim_end_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '_'));

    if cleaned.is_empty() {
        DEFAULT_DISK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Produce one valid, unique disk name per disk. With a `prefix` (the VM
/// name) names become `{prefix}_{disk}`. Duplicates get numeric suffixes:
/// `datadisk`, `datadisk1`, `datadisk2`, ...
pub fn disambiguate_disk_names(prefix: Option<&str>, disks: &[DataDiskConfig]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(disks.len());

    for disk in disks {
        let base = match prefix {
            Some(p) => sanitize_disk_name(&format!("{}_{}", p, disk.name())),
            None => sanitize_disk_name(disk.name()),
        };

        let mut candidate = base.clone();
        let mut suffix = 1u32;
        while used.contains(&candidate.to_ascii_lowercase()) {
            let tail = suffix.to_string();
            let room = MAX_DISK_NAME_LEN - tail.len();
            let head: String = base.chars().take(room).collect();
            candidate = format!("{}{}", head, tail);
            suffix += 1;
        }

        used.insert(candidate.to_ascii_lowercase());
        names.push(candidate);
    }

    names
}
