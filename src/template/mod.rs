//! Deployment template selection.
//!
//! Every deployment maps onto one of a fixed set of packaged ARM templates,
//! chosen by OS, whether it is a cluster, the authentication type and
//! whether a custom script extension is attached.

pub mod parameters;
pub mod store;

pub use parameters::{mask_secure_parameters, resolve_parameters, ResolvedLogin, TemplateParameters};
pub use store::{TemplateSource, TemplateStore};

use std::fmt;

use thiserror::Error;

use crate::config::{AuthType, OsType};

#[derive(Error, Debug, PartialEq)]
pub enum TemplateError {
    #[error("Windows templates only support password authentication")]
    WindowsKeyAuth,

    #[error("Cluster size must be at least 1")]
    EmptyCluster,

    #[error("Template parameter '{0}' is required but was not supplied")]
    MissingParameter(String),

    #[error("Template '{0}' is malformed: {1}")]
    InvalidTemplate(String, String),

    #[error("Failed to read template {0}: {1}")]
    Io(String, String),
}

/// One of the packaged templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKind {
    pub os: OsType,
    pub clustered: bool,
    pub auth: AuthType,
    pub extension: bool,
}

impl TemplateKind {
    /// Pick the template for a deployment. Pure: the same inputs always
    /// give the same member of [`TemplateKind::all`].
    pub fn select(
        os: OsType,
        cluster_size: u32,
        auth: AuthType,
        has_extension: bool,
    ) -> Result<Self, TemplateError> {
        if cluster_size == 0 {
            return Err(TemplateError::EmptyCluster);
        }
        if os.is_windows() && auth == AuthType::Key {
            return Err(TemplateError::WindowsKeyAuth);
        }
        Ok(Self {
            os,
            clustered: cluster_size > 1,
            auth,
            extension: has_extension,
        })
    }

    /// All packaged templates: 8 Ubuntu variants and 4 Windows variants
    pub fn all() -> Vec<TemplateKind> {
        let mut kinds = Vec::with_capacity(12);
        for os in [OsType::Ubuntu, OsType::Windows] {
            let auths: &[AuthType] = if os.is_windows() {
                &[AuthType::Password]
            } else {
                &[AuthType::Key, AuthType::Password]
            };
            for clustered in [false, true] {
                for &auth in auths {
                    for extension in [false, true] {
                        kinds.push(TemplateKind {
                            os,
                            clustered,
                            auth,
                            extension,
                        });
                    }
                }
            }
        }
        kinds
    }

    /// `{os}_vm[_cl][_key|_pwd][_ext].json`; Windows has no auth suffix
    pub fn file_name(&self) -> String {
        let mut name = format!("{}_vm", self.os.as_str());
        if self.clustered {
            name.push_str("_cl");
        }
        if !self.os.is_windows() {
            name.push_str(match self.auth {
                AuthType::Key => "_key",
                AuthType::Password => "_pwd",
            });
        }
        if self.extension {
            name.push_str("_ext");
        }
        name.push_str(".json");
        name
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name().trim_end_matches(".json"))
    }
}
