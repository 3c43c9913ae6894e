//! `cube server`: run, stop, remove and inspect the api-server container.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Subcommand};
use log::info;

use super::host_label;
use crate::config::{ApiServerSettings, Config};
use crate::error::{Error, Result};
use crate::runtime::image::RegistryCredentials;
use crate::runtime::{ContainerManager, DockerEngine};
use crate::types::{BindMount, ContainerDescriptor, ContainerRecord, PortBinding};

/// Port the api-server listens on inside its container.
const LISTEN_PORT: &str = "9600";

#[derive(Debug, Args)]
pub struct ServerArgs {
    #[command(subcommand)]
    pub action: Option<ServerAction>,
}

#[derive(Debug, Subcommand)]
pub enum ServerAction {
    /// Run the api-server, restarting it if it already exists
    Run(RunArgs),
    /// Stop the api-server
    Stop,
    /// Remove the api-server
    Rm,
    /// Show the api-server status
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Host port to publish the api-server on
    #[arg(long)]
    pub port: Option<String>,

    /// Kubernetes config for the api-server; moved to the configured location
    #[arg(long = "kube-config")]
    pub kube_config: Option<PathBuf>,
}

#[derive(Debug, Default, Args)]
pub struct StatusArgs {
    /// Print the container record as JSON
    #[arg(long)]
    pub json: bool,
}

/// What `execute` will ask of the engine, resolved from the arguments
/// before any connection is made.
#[derive(Debug)]
enum Plan {
    Run(ContainerDescriptor),
    Stop,
    Rm,
    Status { json: bool },
}

fn plan(action: Option<ServerAction>, settings: &ApiServerSettings) -> Result<Plan> {
    Ok(match action.unwrap_or(ServerAction::Status(StatusArgs::default())) {
        ServerAction::Run(run) => Plan::Run(prepare_run(&run, settings)?),
        ServerAction::Stop => Plan::Stop,
        ServerAction::Rm => Plan::Rm,
        ServerAction::Status(status) => Plan::Status { json: status.json },
    })
}

pub async fn execute(args: ServerArgs, config: &Config) -> Result<()> {
    let settings = &config.apiserver;
    let plan = plan(args.action, settings)?;

    let engine = DockerEngine::connect(&config.engine).await?;
    let manager = ContainerManager::new(engine, host_label(), config.engine.container_timeout())
        .with_credentials(RegistryCredentials::from_registries(&config.registries));
    let name = settings.container_name.as_str();

    match plan {
        Plan::Run(descriptor) => {
            manager.ensure_running(&descriptor, name).await?;
            info!("Api-server {} is running", name);
            Ok(())
        }
        Plan::Stop => manager.stop(name).await,
        Plan::Rm => manager.remove(name).await,
        Plan::Status { json } => {
            let record = manager.status(name).await?;
            print_status(record.as_ref(), json)
        }
    }
}

/// Validates `server run` flags, relocates the kube config if asked to and
/// builds the api-server descriptor.
fn prepare_run(run: &RunArgs, settings: &ApiServerSettings) -> Result<ContainerDescriptor> {
    let port = run.port.as_deref().unwrap_or(&settings.port);
    if port.is_empty() {
        return Err(Error::Config("cube server run: require port".into()));
    }
    if let Some(kube_config) = &run.kube_config {
        if kube_config.as_os_str().is_empty() {
            return Err(Error::Config("cube server run: require kube-config".into()));
        }
        relocate_kube_config(kube_config, &settings.kube_config)?;
    }
    Ok(apiserver_descriptor(settings, port))
}

fn relocate_kube_config(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    let moved = match to.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
    .and_then(|_| fs::rename(from, to));
    moved.map_err(|e| {
        Error::Config(format!(
            "can not move kube config {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })?;
    info!("Moved kube config {} to {}", from.display(), to.display());
    Ok(())
}

pub fn apiserver_descriptor(settings: &ApiServerSettings, host_port: &str) -> ContainerDescriptor {
    let kube_config = settings.kube_config.to_string_lossy().into_owned();
    let container_port = format!("{}/tcp", LISTEN_PORT);
    ContainerDescriptor {
        image: settings.image.clone(),
        cmd: vec![
            "serve".to_string(),
            format!("--listen-addr=0.0.0.0:{}", LISTEN_PORT),
        ],
        exposed_ports: vec![container_port.clone()],
        mounts: vec![BindMount {
            source: kube_config.clone(),
            target: kube_config,
        }],
        port_bindings: vec![PortBinding {
            container_port,
            host_ip: "0.0.0.0".to_string(),
            host_port: host_port.to_string(),
        }],
        networks: Vec::new(),
    }
}

fn print_status(record: Option<&ContainerRecord>, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(&record)
            .map_err(|e| Error::Config(format!("can not encode status: {}", e)))?;
        println!("{}", out);
        return Ok(());
    }

    println!(
        "{:<14}{:<32}{:<24}{:<18}{:<20}{:<28}{}",
        "CONTAINER ID", "IMAGE", "COMMAND", "CREATED", "STATUS", "PORTS", "NAMES"
    );
    if let Some(c) = record {
        println!(
            "{:<14}{:<32}{:<24}{:<18}{:<20}{:<28}{}",
            c.id.chars().take(12).collect::<String>(),
            c.image,
            format!("{:?}", truncate(&c.command, 20)),
            ago(c.created),
            c.status,
            ports(c),
            c.names
                .iter()
                .map(|n| n.trim_start_matches('/'))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(max - 1).collect::<String>())
    }
}

fn ports(c: &ContainerRecord) -> String {
    c.ports
        .iter()
        .map(|p| {
            let proto = p.protocol.as_deref().unwrap_or("tcp");
            match p.public_port {
                Some(public) => format!(
                    "{}:{}->{}/{}",
                    p.ip.as_deref().unwrap_or("0.0.0.0"),
                    public,
                    p.private_port,
                    proto
                ),
                None => format!("{}/{}", p.private_port, proto),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn ago(created: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(created);
    let secs = (now - created).max(0);
    match secs {
        0..=59 => format!("{} seconds ago", secs),
        60..=3599 => format!("{} minutes ago", secs / 60),
        3600..=86399 => format!("{} hours ago", secs / 3600),
        _ => format!("{} days ago", secs / 86400),
    }
}
