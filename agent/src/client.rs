//! Update client workflow
//!
//! Ties the pieces together: authenticates against the server, polls for
//! pending deployments, streams the artifact through the decoder into the
//! registered update modules and reports the deployment lifecycle back to
//! the server.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::api::{ApiClient, DeploymentDescriptor, DeploymentStatus};
use crate::config::Settings;
use crate::crypto::{ArtifactVerifier, PayloadSigner};
use crate::download::download_artifact;
use crate::errors::AgentError;
use crate::installer::{ModuleRegistry, UpdateModule};
use crate::keyvalue::{KeyValueList, Keystore};

/// The over-the-air update client.
///
/// Owns the server connection, the update module registry and the
/// persisted provides metadata carried from one deployment to the next.
pub struct UpdateClient {
    settings: Settings,
    api: ApiClient,
    registry: ModuleRegistry,
    signer: Arc<dyn PayloadSigner>,
    verifier: Arc<dyn ArtifactVerifier>,
    identity: Keystore,
    inventory: Keystore,
    provides: KeyValueList,
}

impl UpdateClient {
    /// Create a client from settings and the device identity.
    ///
    /// `signer` authenticates the device; `verifier` checks artifact
    /// signatures during download.
    pub fn new(
        settings: Settings,
        identity: Keystore,
        signer: Arc<dyn PayloadSigner>,
        verifier: Arc<dyn ArtifactVerifier>,
    ) -> Result<Self, AgentError> {
        let api = ApiClient::new(
            &settings.host,
            &settings.device_type,
            &settings.artifact_name,
            settings.tenant_token.clone(),
        )?;
        Ok(Self {
            settings,
            api,
            registry: ModuleRegistry::new(),
            signer,
            verifier,
            identity,
            inventory: Keystore::new(),
            provides: KeyValueList::new(),
        })
    }

    /// Register an update module for its payload type
    pub fn register_module(&mut self, module: Box<dyn UpdateModule>) {
        self.registry.register(module);
    }

    /// Replace the inventory attributes published after authentication
    pub fn set_inventory(&mut self, inventory: Keystore) {
        self.inventory = inventory;
    }

    /// Provides metadata accumulated from installed artifacts
    pub fn provides(&self) -> &KeyValueList {
        &self.provides
    }

    /// Restore provides metadata persisted across restarts
    pub fn set_provides(&mut self, provides: KeyValueList) {
        self.provides = provides;
    }

    /// The server API client
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Authenticate the device with the server
    pub async fn authenticate(&mut self) -> Result<(), AgentError> {
        self.api
            .authenticate(self.signer.as_ref(), &self.identity)
            .await
    }

    /// Perform one deployment check and, when one is pending, run it to
    /// completion.
    ///
    /// A deployment carrying the already installed artifact name is
    /// acknowledged as `already-installed` without downloading anything.
    /// Any failure after the download started is reported to the server
    /// as `failure` and the exercised modules are rolled back.
    pub async fn update_once(&mut self) -> Result<(), AgentError> {
        info!("Checking for deployment...");
        let provides = self
            .settings
            .provides_depends
            .then_some(&self.provides);
        let Some(deployment) = self.api.check_for_deployment(provides).await? else {
            info!("No deployment available");
            return Ok(());
        };

        if deployment.artifact_name == self.api.artifact_name() {
            error!(
                "Artifact '{}' is already installed",
                deployment.artifact_name
            );
            let _ = self
                .api
                .publish_deployment_status(&deployment.id, DeploymentStatus::AlreadyInstalled)
                .await;
            return Ok(());
        }

        info!(
            "Downloading deployment artifact with id '{}', artifact name '{}' and uri '{}'",
            deployment.id, deployment.artifact_name, deployment.uri
        );
        let _ = self
            .api
            .publish_deployment_status(&deployment.id, DeploymentStatus::Downloading)
            .await;

        match self.run_deployment(&deployment).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Deployment '{}' failed: {}", deployment.id, e);
                let _ = self
                    .api
                    .publish_deployment_status(&deployment.id, DeploymentStatus::Failure)
                    .await;
                self.registry.rollback_active().await;
                self.registry.cleanup_active().await;
                Err(e)
            }
        }
    }

    async fn run_deployment(&mut self, deployment: &DeploymentDescriptor) -> Result<(), AgentError> {
        let mut decoder = download_artifact(
            self.api.http_client(),
            &deployment.uri,
            &mut self.registry,
            self.verifier.clone(),
            self.settings.recv_buf_length,
        )
        .await?;

        let artifact_device_type = decoder.device_type().ok_or_else(|| {
            AgentError::MalformedInput("Artifact header carries no device type".to_string())
        })?;
        compare_device_types(
            artifact_device_type,
            self.api.device_type(),
            &deployment.device_types_compatible,
        )?;

        // New provides shadow previously stored ones on lookup.
        let mut provides = decoder.take_provides();
        provides.append(std::mem::take(&mut self.provides));
        self.provides = provides;

        info!("Download done, installing artifact");
        let _ = self
            .api
            .publish_deployment_status(&deployment.id, DeploymentStatus::Installing)
            .await;
        self.registry.install_active().await?;

        if self.registry.needs_restart() {
            info!("Artifact installed, rebooting to apply it");
            let _ = self
                .api
                .publish_deployment_status(&deployment.id, DeploymentStatus::Rebooting)
                .await;
            self.registry.reboot_active().await?;
        } else {
            self.registry.commit_active().await?;
            let _ = self
                .api
                .publish_deployment_status(&deployment.id, DeploymentStatus::Success)
                .await;
            self.api.set_artifact_name(&deployment.artifact_name);
            info!(
                "Deployment '{}' applied, now running artifact '{}'",
                deployment.id, deployment.artifact_name
            );
        }

        self.registry.cleanup_active().await;
        Ok(())
    }

    /// Run the client until `shutdown_signal` resolves.
    ///
    /// Authenticates on the authentication poll interval until a token is
    /// obtained, publishes the inventory, then checks for deployments on
    /// the update poll interval. Errors are logged and retried on the
    /// next tick.
    pub async fn run(&mut self, mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>) {
        info!("Update client starting...");
        loop {
            if !self.api.is_authenticated() {
                match self.authenticate().await {
                    Ok(()) => {
                        info!("Device authenticated");
                        if let Err(e) = self.api.publish_inventory_data(&self.inventory).await {
                            error!("Unable to publish inventory data: {}", e);
                        }
                    }
                    Err(e) => error!("Authentication failed: {}", e),
                }
            }

            if self.api.is_authenticated() {
                if let Err(e) = self.update_once().await {
                    error!("Update check failed: {}", e);
                }
            }

            let interval = if self.api.is_authenticated() {
                self.settings.update_poll_interval_secs
            } else {
                self.settings.authentication_poll_interval_secs
            };
            debug!("Next poll in {}s", interval);

            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Update client shutting down...");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            }
        }
    }
}

/// Check that the artifact and the deployment both target this device.
///
/// The artifact header must name the configured device type and the
/// deployment compatibility list must include it.
pub fn compare_device_types(
    artifact_device_type: &str,
    device_type: &str,
    device_types_compatible: &[String],
) -> Result<(), AgentError> {
    if artifact_device_type != device_type {
        return Err(AgentError::ProtocolError(format!(
            "Artifact device type '{}' is not compatible with device '{}'",
            artifact_device_type, device_type
        )));
    }
    if !device_types_compatible.iter().any(|t| t == device_type) {
        return Err(AgentError::ProtocolError(format!(
            "Deployment is not compatible with device '{}'",
            device_type
        )));
    }
    Ok(())
}
