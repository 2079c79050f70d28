pub mod arm;
pub mod auth;
pub mod resource;

pub use arm::{ArmClient, DEFAULT_ENDPOINT};
pub use auth::{ClientSecretCredential, Credential};
pub use resource::{api_versions, ResourceGroupRef, ResourceId};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("API error: {status} {} - {message}", .code.as_deref().unwrap_or("-"))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid resource id: {0}")]
    InvalidResourceId(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api { status: 404, .. })
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

/// Verbs on ARM resource paths. Paths start at `/subscriptions/...`;
/// bodies of 202/204 responses come back as `Value::Null`.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn get(&self, path: &str, api_version: &str) -> Result<Value, ClientError>;

    async fn put(&self, path: &str, api_version: &str, body: &Value) -> Result<Value, ClientError>;

    async fn patch(&self, path: &str, api_version: &str, body: &Value)
        -> Result<Value, ClientError>;

    async fn post(
        &self,
        path: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError>;

    /// Deleting a resource that does not exist succeeds.
    async fn delete(&self, path: &str, api_version: &str) -> Result<(), ClientError>;
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================
