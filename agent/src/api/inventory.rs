//! Inventory attribute publishing

use http::StatusCode;
use serde::Serialize;
use tracing::{debug, error};

use crate::api::client::{response_error, ApiClient, API_PATH_PUT_DEVICE_ATTRIBUTES};
use crate::errors::AgentError;
use crate::keyvalue::Keystore;

#[derive(Serialize)]
struct InventoryItem<'a> {
    name: &'a str,
    value: &'a str,
}

impl ApiClient {
    /// Publish the device inventory attributes.
    ///
    /// The artifact name, rootfs image version and device type are always
    /// included ahead of the caller-supplied attributes.
    pub async fn publish_inventory_data(&self, inventory: &Keystore) -> Result<(), AgentError> {
        let mut items = vec![
            InventoryItem {
                name: "artifact_name",
                value: self.artifact_name(),
            },
            InventoryItem {
                name: "rootfs-image.version",
                value: self.artifact_name(),
            },
            InventoryItem {
                name: "device_type",
                value: self.device_type(),
            },
        ];
        for item in inventory.iter() {
            items.push(InventoryItem {
                name: &item.name,
                value: &item.value,
            });
        }

        let url = self.url(API_PATH_PUT_DEVICE_ATTRIBUTES);
        debug!("PUT {}", url);
        let response = self
            .client
            .put(&url)
            .bearer_auth(self.bearer()?)
            .json(&items)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let msg = response_error(status, (!body.is_empty()).then_some(body.as_str()));
            error!("Unable to publish inventory data: {}", msg);
            return Err(AgentError::ProtocolError(msg));
        }
        Ok(())
    }
}
