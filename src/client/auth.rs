//! Bearer tokens for the management endpoint.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::ClientError;

/// Default Entra ID authority
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// How the client obtains its bearer token
pub enum Credential {
    /// Pre-acquired token, e.g. from `az account get-access-token`
    Static(String),
    /// Service principal secret exchanged for tokens on demand
    ClientSecret(ClientSecretCredential),
}

impl Credential {
    pub fn token_static(token: impl Into<String>) -> Self {
        Credential::Static(token.into())
    }

    pub async fn token(&self, http: &reqwest::Client) -> Result<String, ClientError> {
        match self {
            Credential::Static(token) => Ok(token.clone()),
            Credential::ClientSecret(cred) => cred.token(http).await,
        }
    }
}

pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority: String,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

// ============================================================================
// SBIO: Pure functions (no I/O)
// ============================================================================

pub fn token_url(authority: &str, tenant_id: &str) -> String {
    format!(
        "{}/{}/oauth2/v2.0/token",
        authority.trim_end_matches('/'),
        tenant_id
    )
}

/// `.default` scope for a resource endpoint
pub fn default_scope(endpoint: &str) -> String {
    format!("{}/.default", endpoint.trim_end_matches('/'))
}

pub fn needs_refresh(cached: Option<&CachedToken>, now: DateTime<Utc>) -> bool {
    match cached {
        None => true,
        Some(token) => now + Duration::seconds(REFRESH_MARGIN_SECS) >= token.expires_at,
    }
}

// ============================================================================
// SBIO: I/O - token endpoint
// ============================================================================

impl ClientSecretCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        endpoint: &str,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority: DEFAULT_AUTHORITY.to_string(),
            scope: default_scope(endpoint),
            cache: Mutex::new(None),
        }
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub async fn token(&self, http: &reqwest::Client) -> Result<String, ClientError> {
        let mut cache = self.cache.lock().await;
        if !needs_refresh(cache.as_ref(), Utc::now()) {
            if let Some(token) = cache.as_ref() {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Requesting token for client {}", self.client_id);
        let fresh = self.request_token(http).await?;
        let access_token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(access_token)
    }

    async fn request_token(&self, http: &reqwest::Client) -> Result<CachedToken, ClientError> {
        let url = token_url(&self.authority, &self.tenant_id);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ClientError::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Auth(format!("{}: {}", status.as_u16(), text)));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Auth(format!("invalid token response: {}", e)))?;

        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: token_expiry(Utc::now(), body.expires_in)?,
        })
    }
}

/// Absolute expiry for a token valid for `expires_in` seconds from `now`
fn token_expiry(now: DateTime<Utc>, expires_in: u64) -> Result<DateTime<Utc>, ClientError> {
    i64::try_from(expires_in)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| ClientError::Auth(format!("token lifetime {}s out of range", expires_in)))
}
