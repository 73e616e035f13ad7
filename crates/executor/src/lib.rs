// Domain-driven module structure for the Forgerunner Docker executor.

// Core infrastructure
pub mod config;
pub mod docker;
pub mod error;
pub mod trace;

// Domain modules
pub mod executor;
pub mod glob;
pub mod helper_image;
pub mod job;
pub mod labels;
pub mod networks;
pub mod pull;
pub mod shell;
pub mod volumes;
pub mod wait;

pub use error::ExecutorError;
pub use executor::{ContainerKind, DockerExecutor, ExecutorStage};
