//! HTTP client for server communication

use http::StatusCode;
use reqwest::Client;

use crate::errors::AgentError;

/// Paths of the server device APIs
pub const API_PATH_POST_AUTHENTICATION_REQUESTS: &str =
    "/api/devices/v1/authentication/auth_requests";
pub const API_PATH_GET_NEXT_DEPLOYMENT: &str =
    "/api/devices/v1/deployments/device/deployments/next";
pub const API_PATH_POST_NEXT_DEPLOYMENT_V2: &str =
    "/api/devices/v2/deployments/device/deployments/next";
pub const API_PATH_PUT_DEPLOYMENT_STATUS: &str =
    "/api/devices/v1/deployments/device/deployments/{id}/status";
pub const API_PATH_PUT_DEVICE_ATTRIBUTES: &str = "/api/devices/v1/inventory/device/attributes";

/// HTTP client for the device-facing server APIs.
///
/// Holds the authentication token once [`ApiClient::authenticate`]
/// succeeds; every other request sends it as a bearer token.
pub struct ApiClient {
    pub(crate) client: Client,
    host: String,
    pub(crate) jwt: Option<String>,
    device_type: String,
    artifact_name: String,
    pub(crate) tenant_token: Option<String>,
}

impl ApiClient {
    /// Create a client for the server at `host`.
    ///
    /// The host must be non-empty and must not carry a trailing slash.
    pub fn new(
        host: &str,
        device_type: &str,
        artifact_name: &str,
        tenant_token: Option<String>,
    ) -> Result<Self, AgentError> {
        if host.is_empty() {
            return Err(AgentError::ConfigError(
                "Server host can't be null or empty".to_string(),
            ));
        }
        if host.ends_with('/') {
            return Err(AgentError::ConfigError(
                "Server host must not carry a trailing '/'".to_string(),
            ));
        }
        let tenant_token = tenant_token.filter(|t| !t.is_empty());

        // Stall-based limits only: the client is shared with the artifact
        // download, which can legitimately run for minutes, so total
        // request time stays unbounded.
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .read_timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            host: host.to_string(),
            jwt: None,
            device_type: device_type.to_string(),
            artifact_name: artifact_name.to_string(),
            tenant_token,
        })
    }

    /// True once authentication succeeded
    pub fn is_authenticated(&self) -> bool {
        self.jwt.is_some()
    }

    /// Currently installed artifact name
    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    /// Record the artifact name after a successful deployment
    pub fn set_artifact_name(&mut self, artifact_name: &str) {
        self.artifact_name = artifact_name.to_string();
    }

    /// Configured device type
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// The underlying HTTP client, shared with the download pipeline
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    pub(crate) fn bearer(&self) -> Result<&str, AgentError> {
        self.jwt
            .as_deref()
            .ok_or_else(|| AgentError::AuthError("Not authenticated".to_string()))
    }
}

/// Format a server error response for logging and error propagation.
///
/// Produces `[code] phrase: message`, where the message is the server's
/// structured `error` field when the body carries one.
pub fn response_error(status: StatusCode, body: Option<&str>) -> String {
    let Some(phrase) = status.canonical_reason() else {
        return format!("Unknown error occurred, status={}", status.as_u16());
    };

    let message = body
        .and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok())
        .and_then(|json| json.get("error").and_then(|e| e.as_str().map(String::from)))
        .unwrap_or_else(|| "unknown error".to_string());

    format!("[{}] {}: {}", status.as_u16(), phrase, message)
}
