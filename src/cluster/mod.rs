//! # Deployed VM clusters
//!
//! A [`VmCluster`] wraps one template deployment: a single VM or a cluster of
//! identically configured VMs. It materializes one [`VmInstance`] per VM by
//! querying the provider and proxies lifecycle calls to every instance in
//! turn, re-reading their status afterwards.
//!
//! ## Status reconciliation
//!
//! Construction, and every lifecycle call on a wrapper whose instances are
//! not materialized, runs initialization. A failed initialization is retried
//! once; if the deployment is still not ready the wrapper reports
//! [`ClusterState::DeploymentInProgress`] rather than failing.

pub mod instance;
pub mod vm_cluster;

pub use instance::{script_output_text, DiskInfo, PowerState, VmInstance};
pub use vm_cluster::{
    deletion_order, ActionOutcome, ClusterState, DeploymentRecord, ScriptOutput, VmCluster,
};

use std::time::Duration;

use thiserror::Error;

use crate::client::ClientError;

/// Number of initialization attempts before reporting "in progress"
pub const INIT_ATTEMPTS: u32 = 2;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Deployment '{0}' not found")]
    DeploymentNotFound(String),

    #[error("Deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("Instance {0} out of range: cluster has {1} instance(s)")]
    NoSuchInstance(usize, usize),

    #[error("VM size must not be empty")]
    InvalidSize,

    #[error("Timed out waiting for {0}")]
    WaitTimeout(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Fixed-interval polling with a bounded number of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 90,
        }
    }
}

impl WaitPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Poll without sleeping; used against in-memory providers
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(Duration::ZERO, max_attempts)
    }
}
