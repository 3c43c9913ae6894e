//! `cube node`: list, add and remove roster entries.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use log::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::provision::Provisioner;
use crate::roster::{AddOutcome, RemoveOutcome, Roster, RosterStore};
use crate::types::NodeEntry;

#[derive(Debug, Args)]
pub struct NodeArgs {
    #[command(subcommand)]
    pub action: Option<NodeAction>,
}

#[derive(Debug, Subcommand)]
pub enum NodeAction {
    /// List the roster
    Ls(LsArgs),
    /// Add a node to the roster
    Add(AddArgs),
    /// Remove a node from the roster
    Rm(RmArgs),
}

#[derive(Debug, Default, Args)]
pub struct LsArgs {
    /// Print the nodes as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Node address, e.g. 10.0.0.5
    pub address: String,

    #[arg(long, value_delimiter = ',', default_value = "controlplane,worker,etcd")]
    pub roles: Vec<String>,

    #[arg(long, default_value = "rancher")]
    pub user: String,

    #[arg(long = "ssh-key-path", default_value = "/home/rancher/.ssh/id_rsa")]
    pub ssh_key_path: String,
}

#[derive(Debug, Args)]
pub struct RmArgs {
    /// Node address to remove
    pub address: String,
}

pub async fn execute(args: NodeArgs, config: &Config) -> Result<()> {
    let store = RosterStore::new(&config.roster);
    let provisioner = Provisioner::from_settings(&config.provision)?;

    match args.action.unwrap_or(NodeAction::Ls(LsArgs::default())) {
        NodeAction::Ls(ls) => list(&store.load()?, ls.json),
        NodeAction::Add(add) => {
            if add.address.is_empty() {
                return Err(Error::Config("cube node add: require address".into()));
            }
            let mut roster = store.load()?;
            let entry = NodeEntry::new(add.address, add.roles, add.user, add.ssh_key_path);
            match roster.add(entry) {
                AddOutcome::Added => commit(&store, &roster, provisioner.as_ref()).await,
                AddOutcome::AlreadyExists => Ok(()),
            }
        }
        NodeAction::Rm(rm) => {
            if rm.address.is_empty() {
                return Err(Error::Config("cube node remove: require address".into()));
            }
            let mut roster = store.load()?;
            match roster.remove(&rm.address) {
                RemoveOutcome::Removed(node) => {
                    info!("Removing node {}", node.address);
                    commit(&store, &roster, provisioner.as_ref()).await
                }
                RemoveOutcome::NotFound => {
                    info!("Node {} is not in the roster", rm.address);
                    Ok(())
                }
                RemoveOutcome::Empty => Ok(()),
            }
        }
    }
}

/// Persists a mutated roster. With a provisioner configured the roster is
/// only saved once the cluster engine accepted it.
async fn commit(
    store: &RosterStore,
    roster: &Roster,
    provisioner: Option<&Provisioner>,
) -> Result<()> {
    let Some(provisioner) = provisioner else {
        return store.save(roster);
    };

    let staging = staging_path(store.path());
    store.save_to(roster, &staging)?;
    let provisioned = provisioner.provision(&staging).await;
    if let Err(e) = fs::remove_file(&staging) {
        warn!("Failed to remove staging roster {}: {}", staging.display(), e);
    }
    provisioned?;
    store.save(roster)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".provision");
    path.with_file_name(name)
}

fn list(roster: &Roster, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(roster.nodes())
            .map_err(|e| Error::Config(format!("can not encode nodes: {}", e)))?;
        println!("{}", out);
        return Ok(());
    }

    if roster.is_empty() {
        info!("No nodes in roster");
        return Ok(());
    }

    println!("{:<18}{:<28}{:<12}{}", "ADDRESS", "ROLES", "USER", "SSH KEY PATH");
    for node in roster.nodes() {
        println!(
            "{:<18}{:<28}{:<12}{}",
            node.address,
            node.roles.join(","),
            node.user,
            node.ssh_key_path
        );
    }
    Ok(())
}
