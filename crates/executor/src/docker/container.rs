//! Container domain — create, start, inspect, remove, kill, wait, attach,
//! and bounded log capture.

use bollard::container::AttachContainerResults;
use bollard::models::{ContainerCreateBody, ContainerInspectResponse};
use bollard::query_parameters::{
    AttachContainerOptions, CreateContainerOptions, KillContainerOptions, LogsOptions,
    RemoveContainerOptions,
};
use futures_util::stream::StreamExt;

use super::client::{DockerClient, DockerError};

impl DockerClient {
    /// Create a container and return its ID.
    pub async fn create_container(
        &self,
        name: &str,
        platform: Option<String>,
        body: ContainerCreateBody,
    ) -> Result<String, DockerError> {
        let options = Some(CreateContainerOptions {
            name: Some(name.to_string()),
            platform: platform.unwrap_or_default(),
        });

        let response = self
            .client
            .create_container(options, body)
            .await
            .map_err(DockerError::from)?;

        Ok(response.id)
    }

    pub async fn start_container(&self, container_id: &str) -> Result<(), DockerError> {
        self.client
            .start_container(
                container_id,
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
            .map_err(|e| DockerError::or_not_found(e, container_id))
    }

    pub async fn inspect_container(
        &self,
        container_id: &str,
    ) -> Result<ContainerInspectResponse, DockerError> {
        self.client
            .inspect_container(
                container_id,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
            .map_err(|e| DockerError::or_not_found(e, container_id))
    }

    /// Remove a container. If `force` is true, a running container is killed
    /// first.
    pub async fn remove_container(
        &self,
        container_id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), DockerError> {
        let options = Some(RemoveContainerOptions {
            force,
            v: remove_volumes,
            ..Default::default()
        });

        self.client
            .remove_container(container_id, options)
            .await
            .map_err(|e| DockerError::or_not_found(e, container_id))
    }

    pub async fn kill_container(
        &self,
        container_id: &str,
        signal: &str,
    ) -> Result<(), DockerError> {
        let options = Some(KillContainerOptions {
            signal: signal.to_string(),
        });

        self.client
            .kill_container(container_id, options)
            .await
            .map_err(|e| DockerError::or_not_found(e, container_id))
    }

    /// Block until the container exits and return its exit code.
    pub async fn wait_container(&self, container_id: &str) -> Result<i64, DockerError> {
        let mut stream = self.client.wait_container(
            container_id,
            None::<bollard::query_parameters::WaitContainerOptions>,
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Bollard reports a non-zero exit as a dedicated error variant.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(DockerError::or_not_found(e, container_id)),
            None => Err(DockerError::NotFound(container_id.to_string())),
        }
    }

    /// Attach to a container's stdio before starting it.
    pub async fn attach_container(
        &self,
        container_id: &str,
    ) -> Result<AttachContainerResults, DockerError> {
        let options = Some(AttachContainerOptions {
            stream: true,
            stdin: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        });

        self.client
            .attach_container(container_id, options)
            .await
            .map_err(|e| DockerError::or_not_found(e, container_id))
    }

    /// Capture a container's combined output for diagnostics, truncated at
    /// `limit` bytes. Errors come back as the error text so callers can
    /// always embed the result in a message.
    pub async fn container_logs_tail(&self, container_id: &str, limit: usize) -> String {
        let options = Some(LogsOptions {
            follow: false,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: "all".to_string(),
            ..Default::default()
        });

        let mut stream = self.client.logs(container_id, options);
        let mut buf = Vec::with_capacity(limit.min(4096));

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    let bytes = output.into_bytes();
                    let remaining = limit.saturating_sub(buf.len());
                    if remaining == 0 {
                        break;
                    }
                    buf.extend_from_slice(&bytes[..bytes.len().min(remaining)]);
                }
                Err(e) => return e.to_string().trim().to_string(),
            }
        }

        String::from_utf8_lossy(&buf).trim().to_string()
    }
}
