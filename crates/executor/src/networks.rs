//! Networks Manager — the job's container network.
//!
//! Three shapes: an operator-configured mode (used verbatim), a per-build
//! bridge network (feature flag), or the daemon default.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::models::Network;
use tracing::{debug, warn};

use crate::docker::client::{DockerClient, DockerError};

/// The network the job's containers join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkMode {
    pub name: String,
    /// The network was created for this job and must be removed with it.
    pub per_build: bool,
}

impl NetworkMode {
    /// The network name when it is one containers attach to by name, as
    /// opposed to a daemon mode string like `host` or the default.
    pub fn user_defined(&self) -> Option<&str> {
        match self.name.as_str() {
            "" | "host" | "none" | "bridge" => None,
            name => Some(name),
        }
    }
}

/// The daemon operations this manager needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn create_network(
        &self,
        name: &str,
        enable_ipv6: bool,
        labels: HashMap<String, String>,
    ) -> Result<String, DockerError>;

    async fn inspect_network(&self, network_id: &str) -> Result<Network, DockerError>;

    async fn disconnect_network(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<(), DockerError>;

    async fn remove_network(&self, network_id: &str) -> Result<(), DockerError>;
}

#[async_trait]
impl NetworkClient for DockerClient {
    async fn create_network(
        &self,
        name: &str,
        enable_ipv6: bool,
        labels: HashMap<String, String>,
    ) -> Result<String, DockerError> {
        DockerClient::create_network(self, name, enable_ipv6, labels).await
    }

    async fn inspect_network(&self, network_id: &str) -> Result<Network, DockerError> {
        DockerClient::inspect_network(self, network_id).await
    }

    async fn disconnect_network(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<(), DockerError> {
        DockerClient::disconnect_network(self, network_id, container_id, force).await
    }

    async fn remove_network(&self, network_id: &str) -> Result<(), DockerError> {
        DockerClient::remove_network(self, network_id).await
    }
}

pub struct Manager {
    client: Arc<dyn NetworkClient>,
    /// ID of the network this manager created, if any.
    build_network: Option<String>,
}

impl Manager {
    pub fn new(client: Arc<dyn NetworkClient>) -> Self {
        Self {
            client,
            build_network: None,
        }
    }

    /// Decide the job's network. A configured mode wins outright; the
    /// per-build flag creates a job-unique bridge network; otherwise the
    /// daemon default applies.
    pub async fn create(
        &mut self,
        configured_mode: &str,
        per_build: bool,
        network_name: &str,
        enable_ipv6: bool,
        labels: HashMap<String, String>,
    ) -> Result<NetworkMode, DockerError> {
        if !configured_mode.is_empty() {
            return Ok(NetworkMode {
                name: configured_mode.to_string(),
                per_build: false,
            });
        }

        if !per_build {
            return Ok(NetworkMode::default());
        }

        debug!(network = %network_name, "creating per-build network");
        let id = self
            .client
            .create_network(network_name, enable_ipv6, labels)
            .await?;
        self.build_network = Some(id);

        Ok(NetworkMode {
            name: network_name.to_string(),
            per_build: true,
        })
    }

    /// Inspect the per-build network. `None` when the job runs on a
    /// configured or default network.
    pub async fn inspect(&self) -> Result<Option<Network>, DockerError> {
        match &self.build_network {
            Some(id) => Ok(Some(self.client.inspect_network(id).await?)),
            None => Ok(None),
        }
    }

    /// Remove the per-build network, disconnecting any container still
    /// attached first. A no-op on configured and default networks; failures
    /// are logged, cleanup never propagates them.
    pub async fn cleanup(&mut self) {
        let Some(id) = self.build_network.take() else {
            return;
        };

        // Containers normally leave with their own removal; anything still
        // attached here would make the network removal fail.
        match self.client.inspect_network(&id).await {
            Ok(inspect) => {
                for container in inspect.containers.map(|c| c.into_keys()).into_iter().flatten() {
                    warn!(network = %id, container = %container, "disconnecting leftover container");
                    if let Err(e) = self.client.disconnect_network(&id, &container, true).await {
                        warn!(network = %id, container = %container, error = %e,
                            "failed to disconnect container from per-build network");
                    }
                }
            }
            Err(e) => debug!(network = %id, error = %e, "per-build network inspect failed"),
        }

        debug!(network = %id, "removing per-build network");
        if let Err(e) = self.client.remove_network(&id).await {
            warn!(network = %id, error = %e, "failed to remove per-build network");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_defined_modes() {
        for (name, expected) in [
            ("", None),
            ("host", None),
            ("none", None),
            ("bridge", None),
            ("runner-net-1", Some("runner-net-1")),
        ] {
            let mode = NetworkMode {
                name: name.to_string(),
                per_build: false,
            };
            assert_eq!(mode.user_defined(), expected, "{name:?}");
        }
    }

    #[tokio::test]
    async fn test_configured_mode_short_circuits() {
        let mut client = MockNetworkClient::new();
        client.expect_create_network().times(0);

        let mut mgr = Manager::new(Arc::new(client));
        let mode = mgr
            .create("host", true, "runner-net", false, HashMap::new())
            .await
            .unwrap();
        assert_eq!(mode.name, "host");
        assert!(!mode.per_build);
    }

    #[tokio::test]
    async fn test_default_mode_when_flag_off() {
        let mut client = MockNetworkClient::new();
        client.expect_create_network().times(0);

        let mut mgr = Manager::new(Arc::new(client));
        let mode = mgr
            .create("", false, "runner-net", false, HashMap::new())
            .await
            .unwrap();
        assert_eq!(mode, NetworkMode::default());
        assert!(mgr.inspect().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_per_build_network_created_and_removed() {
        let mut client = MockNetworkClient::new();
        client
            .expect_create_network()
            .withf(|name, ipv6, _| name == "runner-net" && *ipv6)
            .times(1)
            .returning(|_, _, _| Ok("net-id-1".to_string()));
        client
            .expect_inspect_network()
            .returning(|_| Ok(Network::default()));
        client
            .expect_remove_network()
            .withf(|id| id == "net-id-1")
            .times(1)
            .returning(|_| Ok(()));

        let mut mgr = Manager::new(Arc::new(client));
        let mode = mgr
            .create("", true, "runner-net", true, HashMap::new())
            .await
            .unwrap();
        assert!(mode.per_build);
        assert_eq!(mode.user_defined(), Some("runner-net"));

        mgr.cleanup().await;
        // Idempotent: the second call has nothing left to remove.
        mgr.cleanup().await;
    }

    #[tokio::test]
    async fn test_cleanup_swallows_removal_failure() {
        let mut client = MockNetworkClient::new();
        client
            .expect_create_network()
            .returning(|_, _, _| Ok("net-id-2".to_string()));
        client
            .expect_inspect_network()
            .returning(|id| Err(DockerError::NotFound(id.to_string())));
        client
            .expect_remove_network()
            .times(1)
            .returning(|id| Err(DockerError::NotFound(id.to_string())));

        let mut mgr = Manager::new(Arc::new(client));
        mgr.create("", true, "runner-net", false, HashMap::new())
            .await
            .unwrap();
        mgr.cleanup().await;
    }

    #[tokio::test]
    async fn test_cleanup_disconnects_leftover_containers() {
        let mut client = MockNetworkClient::new();
        client
            .expect_create_network()
            .returning(|_, _, _| Ok("net-id-3".to_string()));
        client.expect_inspect_network().returning(|_| {
            let mut containers = HashMap::new();
            containers.insert("abc123".to_string(), Default::default());
            Ok(Network {
                containers: Some(containers),
                ..Default::default()
            })
        });
        client
            .expect_disconnect_network()
            .withf(|net, container, force| net == "net-id-3" && container == "abc123" && *force)
            .times(1)
            .returning(|_, _, _| Ok(()));
        client
            .expect_remove_network()
            .times(1)
            .returning(|_| Ok(()));

        let mut mgr = Manager::new(Arc::new(client));
        mgr.create("", true, "runner-net", false, HashMap::new())
            .await
            .unwrap();
        mgr.cleanup().await;
    }
}
