use super::{Engine, EngineError, EngineInfo, RegistryAuth};
use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::types::{ContainerDescriptor, ContainerRecord, PortRecord};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, NetworkingConfig,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerSummary, EndpointSettings, HostConfig, Mount, MountTypeEnum, PortMap,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use log::{debug, info, log_enabled, warn, Level};
use std::collections::HashMap;
use std::time::Duration;

/// [`Engine`] backed by a Docker-compatible daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Opens a client for `settings.endpoint` and checks the daemon's
    /// version against `settings.supported_versions`.
    ///
    /// Every call opens a fresh client; nothing is cached between calls.
    pub async fn connect(settings: &EngineSettings) -> Result<Self> {
        let endpoint = settings.endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::Config("engine client endpoint is empty".into()));
        }

        let timeout = settings.client_timeout_secs;
        let connected = if endpoint.starts_with("unix://") {
            Docker::connect_with_unix(endpoint, timeout, API_DEFAULT_VERSION)
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, timeout, API_DEFAULT_VERSION)
        } else {
            return Err(Error::Config(format!(
                "unsupported engine endpoint [{}], expected unix://, tcp:// or http://",
                endpoint
            )));
        };
        let docker = connected.map_err(|e| {
            Error::engine(
                format!("can not connect to engine [{}]", endpoint),
                engine_error(e),
            )
        })?;

        let engine = Self { docker };
        check_engine_version(&engine, &settings.supported_versions).await?;
        debug!("Connected to engine at {}", endpoint);
        Ok(engine)
    }
}

/// Warns when the engine's version is outside `supported`.
///
/// Returns whether the version is supported. Only an unreachable engine or
/// an unparseable version is an error.
pub async fn check_engine_version<E: Engine + ?Sized>(
    engine: &E,
    supported: &[String],
) -> Result<bool> {
    let info = engine
        .info()
        .await
        .map_err(|e| Error::engine("can not retrieve engine info", e))?;
    let valid = is_supported_version(&info.server_version, supported).map_err(|reason| {
        Error::EngineVersion {
            version: info.server_version.clone(),
            reason,
        }
    })?;
    if !valid {
        warn!(
            "Unsupported engine version found [{}], supported versions are {:?}",
            info.server_version, supported
        );
    }
    Ok(valid)
}

pub fn is_supported_version(
    server_version: &str,
    supported: &[String],
) -> std::result::Result<bool, String> {
    // RancherOS system-docker reports a vendor string
    if server_version.contains("ros") {
        return Ok(true);
    }
    let engine = major_minor(server_version)
        .ok_or_else(|| format!("can not parse version [{}]", server_version))?;
    for version in supported {
        if version.splitn(3, '.').count() != 3 {
            return Err(format!("supported version [{}] is not in x.y.z form", version));
        }
        let wanted = major_minor(version)
            .ok_or_else(|| format!("can not parse supported version [{}]", version))?;
        if engine == wanted {
            return Ok(true);
        }
    }
    Ok(false)
}

fn major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts
        .next()?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Some((major, minor.parse().ok()?))
}

fn engine_error(err: bollard::errors::Error) -> EngineError {
    use bollard::errors::Error as DockerError;
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(message),
        DockerError::DockerResponseServerError {
            status_code: 401,
            message,
        } => EngineError::Unauthorized(message),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api {
            status: status_code,
            message,
        },
        DockerError::DockerStreamError { error } => pull_stream_error(error),
        other => EngineError::Transport(other.to_string()),
    }
}

/// Classifies an error the engine reported inside a progress stream.
fn pull_stream_error(message: String) -> EngineError {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("authentication required") {
        EngineError::Unauthorized(message)
    } else {
        EngineError::Api {
            status: 500,
            message,
        }
    }
}

fn record_from_summary(c: ContainerSummary) -> ContainerRecord {
    ContainerRecord {
        id: c.id.unwrap_or_default(),
        names: c.names.unwrap_or_default(),
        image: c.image.unwrap_or_default(),
        command: c.command.unwrap_or_default(),
        created: c.created.unwrap_or_default(),
        status: c.status.unwrap_or_default(),
        ports: c
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| PortRecord {
                ip: p.ip,
                private_port: p.private_port,
                public_port: p.public_port,
                protocol: p.typ.map(|t| t.to_string()),
            })
            .collect(),
    }
}

fn container_config(descriptor: &ContainerDescriptor) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = descriptor
        .exposed_ports
        .iter()
        .map(|p| (p.clone(), HashMap::new()))
        .collect();

    let mounts: Vec<Mount> = descriptor
        .mounts
        .iter()
        .map(|m| Mount {
            source: Some(m.source.clone()),
            target: Some(m.target.clone()),
            typ: Some(MountTypeEnum::BIND),
            ..Default::default()
        })
        .collect();

    let mut port_bindings: PortMap = HashMap::new();
    for binding in &descriptor.port_bindings {
        port_bindings
            .entry(binding.container_port.clone())
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(bollard::models::PortBinding {
                host_ip: Some(binding.host_ip.clone()),
                host_port: Some(binding.host_port.clone()),
            });
    }

    let networking_config = if descriptor.networks.is_empty() {
        None
    } else {
        Some(NetworkingConfig {
            endpoints_config: descriptor
                .networks
                .iter()
                .map(|n| (n.clone(), EndpointSettings::default()))
                .collect(),
        })
    };

    Config {
        image: Some(descriptor.image.clone()),
        cmd: (!descriptor.cmd.is_empty()).then(|| descriptor.cmd.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            mounts: Some(mounts),
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        networking_config,
        ..Default::default()
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn info(&self) -> std::result::Result<EngineInfo, EngineError> {
        let info = self.docker.info().await.map_err(engine_error)?;
        Ok(EngineInfo {
            server_version: info.server_version.unwrap_or_default(),
        })
    }

    async fn list_containers(&self) -> std::result::Result<Vec<ContainerRecord>, EngineError> {
        let opts = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(engine_error)?;
        Ok(containers.into_iter().map(record_from_summary).collect())
    }

    async fn inspect_image(&self, image: &str) -> std::result::Result<(), EngineError> {
        self.docker
            .inspect_image(image)
            .await
            .map(|_| ())
            .map_err(engine_error)
    }

    async fn pull_image(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> std::result::Result<(), EngineError> {
        let opts = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        // bollard encodes the credentials into the X-Registry-Auth header
        let credentials = auth.map(|a| DockerCredentials {
            username: Some(a.username.clone()),
            password: Some(a.password.clone()),
            serveraddress: Some(a.server_address.clone()),
            ..Default::default()
        });

        let verbose = log_enabled!(Level::Debug);
        let mut stream = self.docker.create_image(Some(opts), None, credentials);
        while let Some(msg) = stream.next().await {
            // bollard surfaces in-stream errors as DockerStreamError
            let progress = msg.map_err(engine_error)?;
            if verbose {
                let status = progress.status.unwrap_or_default();
                match (progress.id, progress.progress) {
                    (Some(id), Some(bar)) => println!("{}: {} {}", id, status, bar),
                    (Some(id), None) => println!("{}: {}", id, status),
                    _ => println!("{}", status),
                }
            }
        }
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        descriptor: &ContainerDescriptor,
    ) -> std::result::Result<String, EngineError> {
        let opts = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(opts), container_config(descriptor))
            .await
            .map_err(engine_error)?;
        for warning in &response.warnings {
            warn!("Engine warning while creating {}: {}", name, warning);
        }
        info!("Created container {} ({})", name, response.id);
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> std::result::Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(engine_error)
    }

    async fn restart_container(
        &self,
        id: &str,
        timeout: Duration,
    ) -> std::result::Result<(), EngineError> {
        let opts = RestartContainerOptions {
            t: timeout.as_secs() as isize,
        };
        self.docker
            .restart_container(id, Some(opts))
            .await
            .map_err(engine_error)
    }

    async fn stop_container(
        &self,
        id: &str,
        timeout: Duration,
    ) -> std::result::Result<(), EngineError> {
        let opts = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(id, Some(opts))
            .await
            .map_err(engine_error)
    }

    async fn remove_container(&self, id: &str, force: bool) -> std::result::Result<(), EngineError> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(opts))
            .await
            .map_err(engine_error)
    }
}
