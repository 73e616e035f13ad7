//! Thin wrapper around the Docker daemon API.
//!
//! `client` owns the connection and error type; domain methods live in
//! sibling modules (`container`, `exec`, `image`, `network`, `volume`)
//! which add `impl DockerClient` blocks.

pub mod client;
pub mod container;
pub mod exec;
pub mod image;
pub mod network;
pub mod volume;
