use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ContainerDescriptor, ContainerRecord};

pub mod docker;
pub mod image;
pub mod lifecycle;

#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerEngine;
pub use image::RegistryAuth;
pub use lifecycle::ContainerManager;

/// Failure reported by a container engine call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine or the registry behind it rejected our credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("engine returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// The part of the engine's system information cube cares about.
#[derive(Debug, Clone, Default)]
pub struct EngineInfo {
    pub server_version: String,
}

/// Operations cube issues against a container engine.
///
/// Containers are addressed by id; finding the id for a name is the
/// [`ContainerManager`]'s job.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn info(&self) -> Result<EngineInfo, EngineError>;

    /// Lists every container, running or stopped.
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, EngineError>;

    /// Fails with [`EngineError::NotFound`] when the image is not cached.
    async fn inspect_image(&self, image: &str) -> Result<(), EngineError>;

    /// Pulls `image`, draining the progress stream before returning.
    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>)
        -> Result<(), EngineError>;

    /// Creates a container named `name` and returns its id.
    async fn create_container(
        &self,
        name: &str,
        descriptor: &ContainerDescriptor,
    ) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn restart_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;
}
