//! Build, deploy and manage Azure virtual machines and VM clusters from
//! Resource Manager templates.
//!
//! A deployment file ([`config::DeploymentSpec`]) selects one of the
//! packaged templates ([`template::TemplateKind`]); [`deploy::Deployer`]
//! resolves its parameters and submits it, and [`cluster::VmCluster`]
//! drives the lifecycle of the resulting VMs through a
//! [`client::ResourceManager`].

pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod context;
pub mod deploy;
pub mod template;
