//! Executor error taxonomy.
//!
//! Three terminal classes matter to the caller: build failures (the job's
//! own fault: script exit, disallowed image), system failures (environment
//! fault: daemon unreachable, network create failed), and cancellation.
//! `is_system_failure` encodes the split.

use thiserror::Error;

use crate::config::ConfigError;
use crate::docker::client::DockerError;
use crate::pull::PullError;
use crate::volumes::VolumesError;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("missing docker configuration")]
    MissingDockerConfig,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unsupported os type: {0}")]
    UnsupportedOsType(String),

    #[error("unsupported windows version: {0}")]
    UnsupportedWindowsVersion(String),

    #[error("no image specified to run the build in")]
    NoImageSpecified,

    #[error("failed to parse device string {spec:?}: {reason}")]
    MalformedDevice { spec: String, reason: &'static str },

    #[error("parsing gpu request {spec:?}: {reason}")]
    MalformedDeviceRequest { spec: String, reason: &'static str },

    #[error("invalid service name: {0:?}")]
    InvalidServiceName(String),

    #[error("service {0:?} has no exposed ports")]
    NoExposedPorts(String),

    #[error("invalid health check tcp port: {0:?}")]
    InvalidHealthCheckPort(String),

    #[error("health check failed for service {service}: {diagnostics}")]
    HealthCheckFailed { service: String, diagnostics: String },

    #[error(transparent)]
    Pull(#[from] PullError),

    #[error(transparent)]
    Volumes(#[from] VolumesError),

    #[error("preparing tunnel transport: {0}")]
    Tunnel(String),

    /// An orchestration step ran before the step it depends on.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    #[error(transparent)]
    Docker(#[from] DockerError),

    #[error("build script exited with code {0}")]
    BuildFailed(i64),

    #[error("job cancelled")]
    Aborted,
}

impl ExecutorError {
    /// True for environment faults the caller should classify as a system
    /// failure rather than a failure of the job itself. Pull and create
    /// failures stay job failures: the user picked the image, and the job
    /// log is where the diagnostics belong.
    pub fn is_system_failure(&self) -> bool {
        match self {
            ExecutorError::MissingDockerConfig
            | ExecutorError::Config(_)
            | ExecutorError::UnsupportedOsType(_)
            | ExecutorError::UnsupportedWindowsVersion(_)
            | ExecutorError::Tunnel(_)
            | ExecutorError::NotInitialized(_) => true,
            // Losing the daemon is an environment fault; an API call the
            // daemon rejected is part of the job's own story.
            ExecutorError::Docker(err) => {
                matches!(err, DockerError::ConnectionFailed(_))
            }
            ExecutorError::Volumes(VolumesError::Docker(err)) => {
                matches!(err, DockerError::ConnectionFailed(_))
            }
            ExecutorError::Pull(_)
            | ExecutorError::Volumes(_)
            | ExecutorError::NoImageSpecified
            | ExecutorError::MalformedDevice { .. }
            | ExecutorError::MalformedDeviceRequest { .. }
            | ExecutorError::InvalidServiceName(_)
            | ExecutorError::NoExposedPorts(_)
            | ExecutorError::InvalidHealthCheckPort(_)
            | ExecutorError::HealthCheckFailed { .. }
            | ExecutorError::BuildFailed(_)
            | ExecutorError::Aborted => false,
        }
    }
}
