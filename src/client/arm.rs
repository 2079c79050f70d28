use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;

use super::auth::Credential;
use super::{ClientError, ResourceManager};

/// Public-cloud management endpoint
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

/// Header echoed back by ARM to correlate a request in activity logs
pub const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

/// Extract `(code, message)` from an ARM error body:
/// `{"error": {"code": "...", "message": "..."}}`
pub fn parse_error_body(text: &str) -> (Option<String>, String) {
    let parsed: Option<Value> = serde_json::from_str(text).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .map(String::from);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| text.to_string());
    (code, message)
}

/// Resource manager backed by the ARM REST API
pub struct ArmClient {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
}

impl ArmClient {
    pub fn new(credential: Credential) -> Self {
        Self::with_base_url(DEFAULT_ENDPOINT, credential)
    }

    pub fn with_base_url(base_url: impl Into<String>, credential: Credential) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Value), ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let request_id = Uuid::new_v4();
        trace!("{} {} (api-version {}, request {})", method, url, api_version, request_id);

        let token = self.credential.token(&self.http).await?;
        let mut req = self
            .http
            .request(method, &url)
            .query(&[("api-version", api_version)])
            .header(CLIENT_REQUEST_ID, request_id.to_string())
            .bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(|e| ClientError::Http(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;

        if !status.is_success() {
            let (code, message) = parse_error_body(&text);
            debug!("Request {} failed with {}", request_id, status);
            return Err(ClientError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT || text.trim().is_empty()
        {
            return Ok((status, Value::Null));
        }

        let value = serde_json::from_str(&text).map_err(|e| ClientError::Parse(e.to_string()))?;
        Ok((status, value))
    }
}

#[async_trait]
impl ResourceManager for ArmClient {
    async fn get(&self, path: &str, api_version: &str) -> Result<Value, ClientError> {
        Ok(self.send(Method::GET, path, api_version, None).await?.1)
    }

    async fn put(&self, path: &str, api_version: &str, body: &Value) -> Result<Value, ClientError> {
        Ok(self.send(Method::PUT, path, api_version, Some(body)).await?.1)
    }

    async fn patch(
        &self,
        path: &str,
        api_version: &str,
        body: &Value,
    ) -> Result<Value, ClientError> {
        Ok(self.send(Method::PATCH, path, api_version, Some(body)).await?.1)
    }

    async fn post(
        &self,
        path: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        Ok(self.send(Method::POST, path, api_version, body).await?.1)
    }

    async fn delete(&self, path: &str, api_version: &str) -> Result<(), ClientError> {
        match self.send(Method::DELETE, path, api_version, None).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("{} already gone", path);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
