//! Docker client — core struct, constructor, error type.

use bollard::Docker;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("Docker connection failed: {0}")]
    ConnectionFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cannot load prebuilt image {0}: {1}")]
    PrebuiltImage(String, #[source] std::io::Error),
    #[error("Bollard error: {0}")]
    Bollard(#[from] bollard::errors::Error),
}

impl DockerError {
    /// Maps a daemon 404 onto [`DockerError::NotFound`] carrying `what`,
    /// leaving every other error untouched.
    pub(super) fn or_not_found(err: bollard::errors::Error, what: &str) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => DockerError::NotFound(what.to_string()),
            other => DockerError::Bollard(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DockerError::NotFound(_))
    }
}

/// A caller-supplied tunnel to a remote daemon: it exposes a forwarded local
/// endpoint the client connects to instead of the configured host, and is
/// closed during cleanup.
pub trait Tunnel: Send + Sync {
    /// Endpoint the Docker client should connect to, e.g.
    /// `unix:///tmp/forwarded.sock` or `tcp://127.0.0.1:23750`.
    fn endpoint(&self) -> String;
    fn close(&self);
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    /// `pub(super)` so that domain modules in sibling files can call bollard
    /// APIs directly.
    pub(super) client: Docker,
}

const CONNECT_TIMEOUT_SECS: u64 = 120;

impl DockerClient {
    /// Connect to the daemon at `host`. An empty host uses the platform
    /// default socket; `unix://` and `tcp://`/`http://` endpoints are
    /// supported explicitly.
    pub fn connect(host: &str) -> Result<Self, DockerError> {
        let connection = if host.is_empty() {
            Docker::connect_with_defaults()
        } else if let Some(path) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(path, CONNECT_TIMEOUT_SECS, &bollard::API_DEFAULT_VERSION)
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, &bollard::API_DEFAULT_VERSION)
        } else {
            // A bare path is treated as a unix socket.
            Docker::connect_with_socket(host, CONNECT_TIMEOUT_SECS, &bollard::API_DEFAULT_VERSION)
        }
        .map_err(|e| DockerError::ConnectionFailed(e.to_string()))?;

        Ok(DockerClient { client: connection })
    }

    /// Daemon system information: OS type, architecture, kernel version.
    pub async fn info(&self) -> Result<bollard::models::SystemInfo, DockerError> {
        self.client.info().await.map_err(DockerError::from)
    }
}
