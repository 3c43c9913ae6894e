//! Data structures used throughout cube.
//!
//! A [`ContainerDescriptor`] is rebuilt from command line flags on every
//! invocation and handed to the engine when a container has to be
//! created.  A [`ContainerRecord`] is the engine's view of an existing
//! container; cube only ever reads it.  [`NodeEntry`] is one member of the
//! persisted node roster and is (de)serialised with
//! [`serde`](https://serde.rs/) into the cluster configuration file.

use serde::{Deserialize, Serialize};

/// Everything needed to create a container: image, command, ports,
/// mounts and networks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub image: String,
    pub cmd: Vec<String>,
    /// Exposed ports in `port/protocol` form, e.g. `9600/tcp`.
    pub exposed_ports: Vec<String>,
    pub mounts: Vec<BindMount>,
    pub port_bindings: Vec<PortBinding>,
    /// Networks to attach at creation time. Empty means the engine default.
    pub networks: Vec<String>,
}

/// A bind mount from a host path to a container path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
}

/// Publishes `container_port` (`port/protocol`) on `host_ip:host_port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: String,
    pub host_ip: String,
    pub host_port: String,
}

/// An existing container as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerRecord {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub command: String,
    /// Creation time, seconds since the Unix epoch.
    pub created: i64,
    pub status: String,
    pub ports: Vec<PortRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortRecord {
    pub ip: Option<String>,
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: Option<String>,
}

/// One cluster member in the node roster.
///
/// Keys the roster file carries that cube does not know about are kept in
/// `extra` so they survive a load/save cycle untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub address: String,
    #[serde(rename = "role", default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub ssh_key_path: String,
    #[serde(flatten, default)]
    pub extra: serde_yaml::Mapping,
}

impl NodeEntry {
    pub fn new(
        address: impl Into<String>,
        roles: Vec<String>,
        user: impl Into<String>,
        ssh_key_path: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            roles,
            user: user.into(),
            ssh_key_path: ssh_key_path.into(),
            extra: serde_yaml::Mapping::new(),
        }
    }
}
