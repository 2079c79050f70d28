use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::{TemplateError, TemplateKind};

/// Where a template was loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Builtin,
    Override(PathBuf),
}

/// Packaged templates, optionally shadowed by files in an override directory
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    override_dir: Option<PathBuf>,
}

impl TemplateStore {
    pub fn builtin() -> Self {
        Self { override_dir: None }
    }

    pub fn with_override_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: Some(dir.into()),
        }
    }

    pub fn override_dir(&self) -> Option<&Path> {
        self.override_dir.as_deref()
    }

    /// Raw text of the template embedded in the binary
    pub fn builtin_text(kind: &TemplateKind) -> &'static str {
        use crate::config::{AuthType::*, OsType::*};
        match (kind.os, kind.clustered, kind.auth, kind.extension) {
            (Ubuntu, false, Key, false) => include_str!("../../templates/ubuntu_vm_key.json"),
            (Ubuntu, false, Key, true) => include_str!("../../templates/ubuntu_vm_key_ext.json"),
            (Ubuntu, false, Password, false) => include_str!("../../templates/ubuntu_vm_pwd.json"),
            (Ubuntu, false, Password, true) => {
                include_str!("../../templates/ubuntu_vm_pwd_ext.json")
            }
            (Ubuntu, true, Key, false) => include_str!("../../templates/ubuntu_vm_cl_key.json"),
            (Ubuntu, true, Key, true) => include_str!("../../templates/ubuntu_vm_cl_key_ext.json"),
            (Ubuntu, true, Password, false) => {
                include_str!("../../templates/ubuntu_vm_cl_pwd.json")
            }
            (Ubuntu, true, Password, true) => {
                include_str!("../../templates/ubuntu_vm_cl_pwd_ext.json")
            }
            (Windows, false, _, false) => include_str!("../../templates/windows_vm.json"),
            (Windows, false, _, true) => include_str!("../../templates/windows_vm_ext.json"),
            (Windows, true, _, false) => include_str!("../../templates/windows_vm_cl.json"),
            (Windows, true, _, true) => include_str!("../../templates/windows_vm_cl_ext.json"),
        }
    }

    fn override_path(&self, kind: &TemplateKind) -> Option<PathBuf> {
        let dir = self.override_dir.as_ref()?;
        let expanded = shellexpand::tilde(&dir.to_string_lossy()).into_owned();
        let path = Path::new(&expanded).join(kind.file_name());
        path.is_file().then_some(path)
    }

    /// Where `kind` would be loaded from
    pub fn source(&self, kind: &TemplateKind) -> TemplateSource {
        match self.override_path(kind) {
            Some(path) => TemplateSource::Override(path),
            None => TemplateSource::Builtin,
        }
    }

    /// Load and parse a template, preferring the override directory
    pub async fn load(&self, kind: &TemplateKind) -> Result<Value, TemplateError> {
        let text = match self.override_path(kind) {
            Some(path) => {
                debug!("Loading template override {}", path.display());
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| TemplateError::Io(path.display().to_string(), e.to_string()))?
            }
            None => Self::builtin_text(kind).to_string(),
        };
        parse_template(&kind.file_name(), &text)
    }
}

/// Parse template text and check it has the sections a deployment needs
pub fn parse_template(name: &str, text: &str) -> Result<Value, TemplateError> {
    let template: Value = serde_json::from_str(text)
        .map_err(|e| TemplateError::InvalidTemplate(name.to_string(), e.to_string()))?;

    if !template.get("resources").is_some_and(Value::is_array) {
        return Err(TemplateError::InvalidTemplate(
            name.to_string(),
            "missing 'resources' array".to_string(),
        ));
    }
    if template.get("parameters").is_some_and(|p| !p.is_object()) {
        return Err(TemplateError::InvalidTemplate(
            name.to_string(),
            "'parameters' must be an object".to_string(),
        ));
    }
    Ok(template)
}
