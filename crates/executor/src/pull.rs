//! Pull Manager — resolves an image reference to a local image, honoring
//! pull policies and the deployment's allow-lists.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::models::ImageInspect;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::RegistryAuth;
use crate::docker::client::{DockerClient, DockerError};
use crate::glob::pattern_matches;
use crate::trace::TraceSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    Always,
    IfNotPresent,
    Never,
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PullPolicy::Always => "always",
            PullPolicy::IfNotPresent => "if-not-present",
            PullPolicy::Never => "never",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum PullError {
    #[error(
        "pull policies {requested:?} for image {image:?} are not allowed, \
         runner permits {allowed:?}"
    )]
    NotAllowed {
        image: String,
        requested: Vec<String>,
        allowed: Vec<String>,
    },
    #[error("failed to pull image {image:?}: {source}")]
    PullFailed {
        image: String,
        source: DockerError,
    },
    #[error("image {0:?} not found locally and pull policy is \"never\"")]
    NotFound(String),
    #[error("image {image:?} is not an allowed {option} (allowed: {allowed:?})")]
    DisallowedImage {
        image: String,
        option: String,
        allowed: Vec<String>,
    },
    #[error(transparent)]
    Docker(#[from] DockerError),
}

/// The daemon operations image resolution needs. Also used by helper-image
/// resolution, which shares the inspect/pull/import surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, DockerError>;

    async fn pull_image(
        &self,
        reference: &str,
        platform: Option<String>,
        credentials: Option<DockerCredentials>,
    ) -> Result<(), DockerError>;

    async fn import_image(
        &self,
        archive: &Path,
        repo: &str,
        tag: &str,
        changes: Vec<String>,
    ) -> Result<(), DockerError>;
}

#[async_trait]
impl ImageClient for DockerClient {
    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, DockerError> {
        DockerClient::inspect_image(self, reference).await
    }

    async fn pull_image(
        &self,
        reference: &str,
        platform: Option<String>,
        credentials: Option<DockerCredentials>,
    ) -> Result<(), DockerError> {
        DockerClient::pull_image(self, reference, platform, credentials).await
    }

    async fn import_image(
        &self,
        archive: &Path,
        repo: &str,
        tag: &str,
        changes: Vec<String>,
    ) -> Result<(), DockerError> {
        DockerClient::import_image(self, archive, repo, tag, changes).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Runner-level default policies, used when the image declares none.
    pub default_policies: Vec<PullPolicy>,
    /// Policies the deployment permits. Empty permits all.
    pub allowed_policies: Vec<PullPolicy>,
    /// Per-registry credentials, keyed by registry host.
    pub registry_auth: HashMap<String, RegistryAuth>,
    pub platform: Option<String>,
}

pub struct Manager {
    client: Arc<dyn ImageClient>,
    config: ManagerConfig,
    trace: Arc<dyn TraceSink>,
}

impl Manager {
    pub fn new(
        client: Arc<dyn ImageClient>,
        config: ManagerConfig,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            client,
            config,
            trace,
        }
    }

    /// Resolve `image` to a locally available image, trying each effective
    /// pull policy in order. A pull failure falls through to the next policy
    /// with a warning; the last failure is returned.
    pub async fn resolve(
        &self,
        image: &str,
        image_policies: &[PullPolicy],
    ) -> Result<ImageInspect, PullError> {
        let policies = self.effective_policies(image, image_policies)?;

        let mut attempt = policies.iter().peekable();
        while let Some(policy) = attempt.next() {
            match self.resolve_with_policy(image, *policy).await {
                Ok(inspect) => return Ok(inspect),
                Err(err @ PullError::PullFailed { .. }) if attempt.peek().is_some() => {
                    self.trace.warning(&format!(
                        "Failed to pull image {} with policy \"{}\": {}. \
                         Attempting the next pull policy",
                        image, policy, err
                    ));
                }
                Err(err) => return Err(err),
            }
        }

        // effective_policies never returns an empty list.
        Err(PullError::NotFound(image.to_string()))
    }

    /// The image's own policies (or the runner defaults) filtered by the
    /// allowed set. Disjoint sets are a configuration conflict the job
    /// cannot work around.
    fn effective_policies(
        &self,
        image: &str,
        image_policies: &[PullPolicy],
    ) -> Result<Vec<PullPolicy>, PullError> {
        let requested: Vec<PullPolicy> = if !image_policies.is_empty() {
            image_policies.to_vec()
        } else if !self.config.default_policies.is_empty() {
            self.config.default_policies.clone()
        } else {
            vec![PullPolicy::Always]
        };

        if self.config.allowed_policies.is_empty() {
            return Ok(requested);
        }

        let effective: Vec<PullPolicy> = requested
            .iter()
            .copied()
            .filter(|p| self.config.allowed_policies.contains(p))
            .collect();

        if effective.is_empty() {
            return Err(PullError::NotAllowed {
                image: image.to_string(),
                requested: requested.iter().map(|p| p.to_string()).collect(),
                allowed: self
                    .config
                    .allowed_policies
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            });
        }

        Ok(effective)
    }

    async fn resolve_with_policy(
        &self,
        image: &str,
        policy: PullPolicy,
    ) -> Result<ImageInspect, PullError> {
        match policy {
            PullPolicy::Never => match self.client.inspect_image(image).await {
                Ok(inspect) => Ok(inspect),
                Err(e) if e.is_not_found() => Err(PullError::NotFound(image.to_string())),
                Err(e) => Err(e.into()),
            },
            PullPolicy::IfNotPresent => match self.client.inspect_image(image).await {
                Ok(inspect) => {
                    self.trace.println(&format!(
                        "Using locally found image version for {} due to \
                         \"if-not-present\" pull policy",
                        image
                    ));
                    Ok(inspect)
                }
                Err(e) if e.is_not_found() => self.pull(image).await,
                Err(e) => Err(e.into()),
            },
            PullPolicy::Always => {
                // A digest-pinned reference whose digest is already present
                // locally cannot have changed upstream.
                if image.contains('@') {
                    if let Ok(inspect) = self.client.inspect_image(image).await {
                        if digest_matches(&inspect, image) {
                            debug!(image, "digest already present, skipping pull");
                            return Ok(inspect);
                        }
                    }
                }
                self.pull(image).await
            }
        }
    }

    async fn pull(&self, image: &str) -> Result<ImageInspect, PullError> {
        self.trace
            .println(&format!("Pulling docker image {} ...", image));

        let credentials = self.credentials_for(image);
        self.client
            .pull_image(image, self.config.platform.clone(), credentials)
            .await
            .map_err(|source| PullError::PullFailed {
                image: image.to_string(),
                source,
            })?;

        Ok(self.client.inspect_image(image).await?)
    }

    fn credentials_for(&self, image: &str) -> Option<DockerCredentials> {
        let registry = registry_host(image);
        let auth = self.config.registry_auth.get(registry)?;
        Some(DockerCredentials {
            username: Some(auth.username.clone()),
            password: Some(auth.password.clone()),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        })
    }
}

/// Allow-list check for build and service images. An empty list permits
/// everything; `internal` images (helper, service waiters) are exempt.
pub fn verify_allowed_image(
    image: &str,
    option: &str,
    allowed: &[String],
    internal: &[String],
) -> Result<(), PullError> {
    if allowed.is_empty() {
        return Ok(());
    }
    if internal.iter().any(|i| i == image) {
        return Ok(());
    }
    if allowed.iter().any(|pattern| pattern_matches(pattern, image)) {
        return Ok(());
    }

    Err(PullError::DisallowedImage {
        image: image.to_string(),
        option: option.to_string(),
        allowed: allowed.to_vec(),
    })
}

fn digest_matches(inspect: &ImageInspect, reference: &str) -> bool {
    inspect
        .repo_digests
        .as_ref()
        .is_some_and(|digests| digests.iter().any(|d| d == reference))
}

/// The registry host of a reference: the first path segment when it looks
/// like a host, otherwise the default registry.
fn registry_host(image: &str) -> &str {
    match image.split('/').next() {
        Some(first)
            if image.contains('/')
                && (first.contains('.') || first.contains(':') || first == "localhost") =>
        {
            first
        }
        _ => "docker.io",
    }
}
