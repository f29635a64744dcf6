//! Device authentication

use base64::Engine;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::api::client::{response_error, ApiClient, API_PATH_POST_AUTHENTICATION_REQUESTS};
use crate::crypto::PayloadSigner;
use crate::errors::AgentError;
use crate::keyvalue::Keystore;

impl ApiClient {
    /// Authenticate the device with the server.
    ///
    /// Sends the signed JSON payload `{id_data, pubkey, tenant_token?}`
    /// with a detached signature header; a 200 response body is the raw
    /// token used for all subsequent requests.
    pub async fn authenticate(
        &mut self,
        signer: &dyn PayloadSigner,
        identity: &Keystore,
    ) -> Result<(), AgentError> {
        let public_key_pem = signer.public_key_pem()?;
        let id_data = serde_json::to_string(&identity.to_json())?;

        let mut payload = Map::new();
        payload.insert("id_data".to_string(), Value::String(id_data));
        payload.insert("pubkey".to_string(), Value::String(public_key_pem));
        if let Some(tenant_token) = &self.tenant_token {
            payload.insert(
                "tenant_token".to_string(),
                Value::String(tenant_token.clone()),
            );
        }
        let body = serde_json::to_string(&Value::Object(payload))?;

        let signature = signer.sign(body.as_bytes())?;
        let signature = base64::engine::general_purpose::STANDARD.encode(signature);

        let url = self.url(API_PATH_POST_AUTHENTICATION_REQUESTS);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header("X-MEN-Signature", signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != http::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let msg = response_error(status, (!body.is_empty()).then_some(body.as_str()));
            error!("Authentication failed: {}", msg);
            return Err(AgentError::AuthError(msg));
        }

        let token = response.text().await?;
        if token.is_empty() {
            return Err(AgentError::AuthError(
                "Authentication response is empty".to_string(),
            ));
        }
        self.jwt = Some(token);
        Ok(())
    }
}
