//! Image domain — inspect, registry pull, and tar-archive import.

use std::path::Path;

use bollard::auth::DockerCredentials;
use bollard::models::ImageInspect;
use bollard::query_parameters::CreateImageOptions;
use bytes::Bytes;
use futures_util::stream::StreamExt;

use super::client::{DockerClient, DockerError};

impl DockerClient {
    /// Inspect an image by reference or ID.
    pub async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, DockerError> {
        self.client
            .inspect_image(reference)
            .await
            .map_err(|e| DockerError::or_not_found(e, reference))
    }

    /// Pull an image from a registry. Returns once the pull completes.
    pub async fn pull_image(
        &self,
        reference: &str,
        platform: Option<String>,
        credentials: Option<DockerCredentials>,
    ) -> Result<(), DockerError> {
        let (image, tag) = split_reference(reference);

        let options = Some(CreateImageOptions {
            from_image: Some(image),
            tag: Some(tag),
            platform: platform.unwrap_or_default(),
            ..Default::default()
        });

        let mut stream = self.client.create_image(options, None, credentials);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    tracing::debug!(status = ?info.status, id = ?info.id, "image pull progress");
                }
                Err(e) => return Err(DockerError::from(e)),
            }
        }

        Ok(())
    }

    /// Import an image archive from disk under `repo:tag`. `changes` carries
    /// Dockerfile instructions reapplied on import (exported archives lose
    /// their ENTRYPOINT metadata).
    pub async fn import_image(
        &self,
        archive: &Path,
        repo: &str,
        tag: &str,
        changes: Vec<String>,
    ) -> Result<(), DockerError> {
        let contents = tokio::fs::read(archive)
            .await
            .map_err(|e| DockerError::PrebuiltImage(archive.display().to_string(), e))?;

        let options = Some(CreateImageOptions {
            from_src: Some("-".to_string()),
            repo: Some(repo.to_string()),
            tag: Some(tag.to_string()),
            changes,
            ..Default::default()
        });

        let body = bollard::body_full(Bytes::from(contents));
        let mut stream = self.client.create_image(options, Some(body), None);
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                return Err(DockerError::from(e));
            }
        }

        Ok(())
    }
}

/// Splits `name[:tag]` into image and tag, treating a colon inside the last
/// path segment as the tag separator. Digest references keep the digest on
/// the image part with an empty tag.
fn split_reference(reference: &str) -> (String, String) {
    if reference.contains('@') {
        return (reference.to_string(), String::new());
    }
    let slash = reference.rfind('/');
    match reference.rfind(':') {
        Some(colon) if slash.map_or(true, |s| colon > s) => (
            reference[..colon].to_string(),
            reference[colon + 1..].to_string(),
        ),
        _ => (reference.to_string(), "latest".to_string()),
    }
}
