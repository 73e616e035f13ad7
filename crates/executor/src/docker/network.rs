//! Network domain — create, inspect, list, remove, disconnect.

use std::collections::HashMap;

use bollard::models::{Network, NetworkCreateRequest, NetworkDisconnectRequest};

use super::client::{DockerClient, DockerError};

impl DockerClient {
    /// Create a bridge network and return its ID.
    pub async fn create_network(
        &self,
        name: &str,
        enable_ipv6: bool,
        labels: HashMap<String, String>,
    ) -> Result<String, DockerError> {
        let config = NetworkCreateRequest {
            name: name.to_string(),
            driver: Some("bridge".to_string()),
            enable_ipv6: if enable_ipv6 { Some(true) } else { None },
            labels: Some(labels),
            ..Default::default()
        };

        let response = self
            .client
            .create_network(config)
            .await
            .map_err(DockerError::from)?;

        Ok(response.id)
    }

    pub async fn inspect_network(
        &self,
        network_id: &str,
    ) -> Result<bollard::models::Network, DockerError> {
        self.client
            .inspect_network(
                network_id,
                None::<bollard::query_parameters::InspectNetworkOptions>,
            )
            .await
            .map_err(|e| DockerError::or_not_found(e, network_id))
    }

    pub async fn list_networks(&self) -> Result<Vec<Network>, DockerError> {
        self.client
            .list_networks(None::<bollard::query_parameters::ListNetworksOptions>)
            .await
            .map_err(DockerError::from)
    }

    pub async fn remove_network(&self, network_id: &str) -> Result<(), DockerError> {
        self.client
            .remove_network(network_id)
            .await
            .map_err(|e| DockerError::or_not_found(e, network_id))
    }

    pub async fn disconnect_network(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<(), DockerError> {
        let config = NetworkDisconnectRequest {
            container: Some(container_id.to_string()),
            force: Some(force),
        };

        self.client
            .disconnect_network(network_id, config)
            .await
            .map_err(|e| DockerError::or_not_found(e, network_id))
    }
}
