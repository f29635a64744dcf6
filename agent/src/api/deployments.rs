//! Deployment negotiation and status reporting

use http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::api::client::{
    response_error, ApiClient, API_PATH_GET_NEXT_DEPLOYMENT, API_PATH_POST_NEXT_DEPLOYMENT_V2,
    API_PATH_PUT_DEPLOYMENT_STATUS,
};
use crate::errors::AgentError;
use crate::keyvalue::KeyValueList;

/// Deployment lifecycle statuses reported to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Downloading,
    Installing,
    Rebooting,
    Success,
    Failure,
    AlreadyInstalled,
}

impl DeploymentStatus {
    /// Fixed wire form of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Downloading => "downloading",
            DeploymentStatus::Installing => "installing",
            DeploymentStatus::Rebooting => "rebooting",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failure => "failure",
            DeploymentStatus::AlreadyInstalled => "already-installed",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending deployment resolved from the server
#[derive(Debug, Clone)]
pub struct DeploymentDescriptor {
    /// Deployment ID
    pub id: String,

    /// Name of the artifact to install
    pub artifact_name: String,

    /// Download URI for the artifact
    pub uri: String,

    /// Device types the deployment is compatible with
    pub device_types_compatible: Vec<String>,
}

#[derive(Deserialize)]
struct NextDeploymentResponse {
    id: String,
    artifact: NextDeploymentArtifact,
}

#[derive(Deserialize)]
struct NextDeploymentArtifact {
    artifact_name: String,
    source: NextDeploymentSource,
    device_types_compatible: Vec<String>,
}

#[derive(Deserialize)]
struct NextDeploymentSource {
    uri: String,
}

impl ApiClient {
    /// Ask the server for a pending deployment.
    ///
    /// Attempts the v2 negotiation first; a 404 means the endpoint does
    /// not exist on this server and triggers exactly one fallback to the
    /// v1 API. A 204 on either version means no deployment is pending.
    pub async fn check_for_deployment(
        &self,
        provides: Option<&KeyValueList>,
    ) -> Result<Option<DeploymentDescriptor>, AgentError> {
        let (mut status, mut body) = self.check_for_deployment_v2(provides).await?;

        if status == StatusCode::NOT_FOUND {
            debug!("POST to the v2 deployments API failed, falling back to v1 and GET");
            (status, body) = self.check_for_deployment_v1().await?;
        }

        match status {
            StatusCode::OK => {
                let response: NextDeploymentResponse =
                    serde_json::from_str(&body).map_err(|_| {
                        AgentError::ProtocolError("Invalid deployment response".to_string())
                    })?;
                Ok(Some(DeploymentDescriptor {
                    id: response.id,
                    artifact_name: response.artifact.artifact_name,
                    uri: response.artifact.source.uri,
                    device_types_compatible: response.artifact.device_types_compatible,
                }))
            }
            StatusCode::NO_CONTENT => Ok(None),
            _ => {
                let msg = response_error(status, (!body.is_empty()).then_some(body.as_str()));
                error!("{}", msg);
                Err(AgentError::ProtocolError(msg))
            }
        }
    }

    async fn check_for_deployment_v2(
        &self,
        provides: Option<&KeyValueList>,
    ) -> Result<(StatusCode, String), AgentError> {
        let mut device_provides = Map::new();
        device_provides.insert(
            "device_type".to_string(),
            Value::String(self.device_type().to_string()),
        );
        if let Some(provides) = provides {
            for entry in provides.iter() {
                device_provides.insert(entry.key.clone(), Value::String(entry.value.clone()));
            }
        }
        device_provides.insert(
            "artifact_name".to_string(),
            Value::String(self.artifact_name().to_string()),
        );
        let payload = json!({ "device_provides": Value::Object(device_provides) });

        let url = self.url(API_PATH_POST_NEXT_DEPLOYMENT_V2);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.bearer()?)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    async fn check_for_deployment_v1(&self) -> Result<(StatusCode, String), AgentError> {
        let url = self.url(API_PATH_GET_NEXT_DEPLOYMENT);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("artifact_name", self.artifact_name()),
                ("device_type", self.device_type()),
            ])
            .bearer_auth(self.bearer()?)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    /// Publish the deployment status for `id` to the server.
    ///
    /// The server acknowledges with 204; anything else is logged with the
    /// decoded status phrase and the structured error when present.
    pub async fn publish_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<(), AgentError> {
        let path = API_PATH_PUT_DEPLOYMENT_STATUS.replace("{id}", id);
        let url = self.url(&path);
        debug!("PUT {} ({})", url, status);

        let response = self
            .client
            .put(&url)
            .bearer_auth(self.bearer()?)
            .json(&json!({ "status": status.as_str() }))
            .send()
            .await?;

        let http_status = response.status();
        if http_status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            let msg = response_error(http_status, (!body.is_empty()).then_some(body.as_str()));
            error!("Unable to publish deployment status: {}", msg);
            return Err(AgentError::ProtocolError(msg));
        }
        Ok(())
    }
}
