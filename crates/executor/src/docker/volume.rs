//! Volume domain — create and remove named volumes.

use std::collections::HashMap;

use bollard::models::VolumeCreateOptions;
use bollard::query_parameters::RemoveVolumeOptions;

use super::client::{DockerClient, DockerError};

impl DockerClient {
    pub async fn create_volume(
        &self,
        name: &str,
        driver: Option<&str>,
        labels: HashMap<String, String>,
    ) -> Result<(), DockerError> {
        let config = VolumeCreateOptions {
            name: Some(name.to_string()),
            driver: Some(driver.unwrap_or("local").to_string()),
            labels: Some(labels),
            ..Default::default()
        };

        self.client
            .create_volume(config)
            .await
            .map_err(DockerError::from)?;

        Ok(())
    }

    pub async fn remove_volume(&self, name: &str, force: bool) -> Result<(), DockerError> {
        let options = Some(RemoveVolumeOptions { force });

        self.client
            .remove_volume(name, options)
            .await
            .map_err(|e| DockerError::or_not_found(e, name))
    }
}
