//! Container engine seam.
//!
//! The instance controller only needs a handful of engine operations, so it
//! talks to a narrow [`ContainerEngine`] trait instead of a Docker client.
//! [`BollardEngine`] is the production implementation; tests inject the
//! scripted engine from [`crate::testing`].
//!
//! ```text
//!   Instance ──▶ ContainerEngine ──▶ BollardEngine ──▶ Docker daemon
//!                      │
//!                      └───────────▶ FakeEngine (tests)
//! ```

mod engine;
pub mod recipe;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;

pub use engine::BollardEngine;

/// Host side of a published container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// Published ports keyed by container port spec (`4566/tcp`).
pub type PortMap = HashMap<String, Vec<HostBinding>>;

/// A container the engine reports as running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    pub image: String,
}

/// Everything needed to create the LocalStack container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Environment entries in `KEY=value` form.
    pub env: Vec<String>,
    /// Labels for external discovery and cleanup tooling.
    pub labels: HashMap<String, String>,
    /// Container ports to publish on engine-chosen host ports.
    pub ports: Vec<String>,
}

/// Operations the instance controller needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Build `tag` from a tar build context holding a `Dockerfile`.
    async fn build_image(&self, tag: &str, context: Vec<u8>) -> Result<(), EngineError>;

    /// Whether `image` is present locally.
    async fn image_exists(&self, image: &str) -> bool;

    /// Pull `image` from its registry.
    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// Create a container and return its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Ports currently published by the container.
    async fn inspect_ports(&self, id: &str) -> Result<PortMap, EngineError>;

    /// Stop the container, killing it after `grace`.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError>;

    /// Containers currently running.
    async fn list_running(&self) -> Result<Vec<RunningContainer>, EngineError>;

    /// Recent combined output of the container.
    async fn logs(&self, id: &str) -> Result<String, EngineError>;
}

/// First non-empty host port published for `port`, if any.
pub(crate) fn host_port(ports: &PortMap, port: &str) -> Option<String> {
    ports
        .get(port)?
        .iter()
        .find(|b| !b.host_port.is_empty() && b.host_port != "0")
        .map(|b| b.host_port.clone())
}
