//! Volumes Manager — user binds, cache volumes, and the job's
//! build-directory volume.
//!
//! Whether an "already defined" declaration is an error is the caller's
//! decision: user volumes treat it as fatal, the build-directory volume
//! falls back to a temporary volume.

pub mod parser;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::docker::client::{DockerClient, DockerError};
use parser::VolumeParser;

#[derive(Debug, Error)]
pub enum VolumesError {
    #[error("volume for container path {0:?} is already defined")]
    AlreadyDefined(String),
    #[error("cache volumes are disabled")]
    CacheVolumesDisabled,
    #[error("invalid volume specification: {0:?}")]
    InvalidVolume(String),
    #[error(transparent)]
    Docker(#[from] DockerError),
}

/// The daemon operations this manager needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VolumeClient: Send + Sync {
    async fn create_volume(
        &self,
        name: &str,
        driver: Option<String>,
        labels: HashMap<String, String>,
    ) -> Result<(), DockerError>;

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), DockerError>;
}

#[async_trait]
impl VolumeClient for DockerClient {
    async fn create_volume(
        &self,
        name: &str,
        driver: Option<String>,
        labels: HashMap<String, String>,
    ) -> Result<(), DockerError> {
        DockerClient::create_volume(self, name, driver.as_deref(), labels).await
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), DockerError> {
        DockerClient::remove_volume(self, name, force).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Deployment-wide switch: no cache volumes are ever created.
    pub disable_cache: bool,
    pub volume_driver: Option<String>,
    /// Stable per-project prefix: cache volumes must survive across jobs.
    pub cache_base_name: String,
    /// Randomized per-job prefix for temporary volumes.
    pub unique_name: String,
    pub labels: HashMap<String, String>,
}

pub struct Manager {
    client: Arc<dyn VolumeClient>,
    parser: Arc<dyn VolumeParser>,
    config: ManagerConfig,
    binds: Vec<String>,
    defined: HashSet<String>,
    temporary: Vec<String>,
}

impl Manager {
    pub fn new(
        client: Arc<dyn VolumeClient>,
        parser: Arc<dyn VolumeParser>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            client,
            parser,
            config,
            binds: Vec::new(),
            defined: HashSet::new(),
            temporary: Vec::new(),
        }
    }

    /// Declare a volume: `src:dst[:mode]` becomes a host bind, a bare
    /// container path becomes a persistent cache volume.
    pub async fn create(&mut self, spec: &str) -> Result<(), VolumesError> {
        let parsed = self.parser.parse(spec)?;
        self.register(&parsed.destination)?;

        match parsed.source {
            Some(_) => {
                debug!(bind = %parsed.definition(), "adding host bind");
                self.binds.push(parsed.definition());
                Ok(())
            }
            None => {
                if self.config.disable_cache {
                    debug!(path = %parsed.destination, "cache volumes are disabled");
                    self.defined.remove(&normalize(&parsed.destination));
                    return Err(VolumesError::CacheVolumesDisabled);
                }
                let name = format!(
                    "{}-cache-{}",
                    self.config.cache_base_name,
                    path_hash(&parsed.destination)
                );
                self.create_named(&name, &parsed.destination).await
            }
        }
    }

    /// Create a job-unique volume for `path`, recorded for removal during
    /// cleanup.
    pub async fn create_temporary(&mut self, path: &str) -> Result<(), VolumesError> {
        self.register(path)?;

        let name = format!("{}-cache-{}", self.config.unique_name, path_hash(path));
        self.create_named(&name, path).await?;
        self.temporary.push(name);
        Ok(())
    }

    /// All declared mounts, in daemon bind syntax.
    pub fn binds(&self) -> Vec<String> {
        self.binds.clone()
    }

    /// Remove every temporary volume, best-effort: failures are logged and
    /// the last one reported after all removals were attempted.
    pub async fn remove_temporary(&mut self) -> Result<(), VolumesError> {
        let mut last_err = None;
        for name in self.temporary.drain(..) {
            debug!(volume = %name, "removing temporary volume");
            if let Err(e) = self.client.remove_volume(&name, true).await {
                warn!(volume = %name, error = %e, "failed to remove temporary volume");
                last_err = Some(e);
            }
        }
        last_err.map_or(Ok(()), |e| Err(e.into()))
    }

    fn register(&mut self, destination: &str) -> Result<(), VolumesError> {
        let key = normalize(destination);
        if !self.defined.insert(key) {
            return Err(VolumesError::AlreadyDefined(destination.to_string()));
        }
        Ok(())
    }

    async fn create_named(&mut self, name: &str, destination: &str) -> Result<(), VolumesError> {
        debug!(volume = %name, path = %destination, "creating cache volume");
        self.client
            .create_volume(
                name,
                self.config.volume_driver.clone(),
                self.config.labels.clone(),
            )
            .await?;
        self.binds.push(format!("{}:{}", name, destination));
        Ok(())
    }
}

/// True when `dir` is already covered by a host-bind declaration, meaning
/// the job's build directory needs no volume of its own.
pub fn is_host_mounted(
    parser: &dyn VolumeParser,
    dir: &str,
    volumes: &[String],
) -> Result<bool, VolumesError> {
    for spec in volumes {
        let parsed = parser.parse(spec)?;
        if parsed.source.is_some() && parser.contains_path(&parsed.destination, dir) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        path.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Stable across processes and releases: cache volume names must match
/// between jobs, or every toolchain upgrade would orphan existing caches.
fn path_hash(path: &str) -> String {
    format!("{:x}", md5::compute(path))
}
