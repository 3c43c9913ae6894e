//! Node roster: the ordered list of cluster members kept under the `nodes`
//! key of the cluster configuration file.
//!
//! The rest of the configuration document is opaque to cube. It is kept as
//! parsed and written back unchanged, in its original key order, every
//! time the roster is saved.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_yaml::{Mapping, Value};

use crate::config::RosterSettings;
use crate::error::{Error, Result};
use crate::types::NodeEntry;

const NODES_KEY: &str = "nodes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(NodeEntry),
    NotFound,
    /// The roster had no nodes at all.
    Empty,
}

/// In-memory copy of the roster file. Addresses are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    document: Mapping,
    nodes: Vec<NodeEntry>,
}

impl Roster {
    #[cfg(test)]
    pub fn from_nodes(nodes: Vec<NodeEntry>) -> Self {
        Self {
            document: Mapping::new(),
            nodes,
        }
    }

    pub fn nodes(&self) -> &[NodeEntry] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.nodes.iter().any(|n| n.address == address)
    }

    /// Appends `entry` unless its address is already present, in which
    /// case the roster is left untouched.
    pub fn add(&mut self, entry: NodeEntry) -> AddOutcome {
        if self.contains(&entry.address) {
            warn!("Node {} already exists", entry.address);
            return AddOutcome::AlreadyExists;
        }
        debug!("Adding node {} with roles {:?}", entry.address, entry.roles);
        self.nodes.push(entry);
        AddOutcome::Added
    }

    /// Splices the node with `address` out, keeping the order of the rest.
    pub fn remove(&mut self, address: &str) -> RemoveOutcome {
        if self.nodes.is_empty() {
            warn!("No nodes in roster");
            return RemoveOutcome::Empty;
        }
        let Some(index) = self.nodes.iter().position(|n| n.address == address) else {
            return RemoveOutcome::NotFound;
        };

        let removed = self.nodes[index].clone();
        self.nodes = merge_nodes(&[&self.nodes[..index], &self.nodes[index + 1..]]);
        RemoveOutcome::Removed(removed)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self> {
        let parse_error = |source| Error::RosterParse {
            path: path.to_path_buf(),
            source,
        };

        let document = match serde_yaml::from_str::<Value>(contents).map_err(parse_error)? {
            Value::Null => Mapping::new(),
            Value::Mapping(mapping) => mapping,
            other => serde_yaml::from_value::<Mapping>(other).map_err(parse_error)?,
        };
        let nodes = match document.get(NODES_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_yaml::from_value(value.clone()).map_err(parse_error)?,
        };

        Ok(Self { document, nodes })
    }

    fn to_yaml(&self) -> Result<String> {
        let mut document = self.document.clone();
        document.insert(
            Value::String(NODES_KEY.to_string()),
            serde_yaml::to_value(&self.nodes)?,
        );
        Ok(serde_yaml::to_string(&document)?)
    }
}

/// Concatenates node sequences, keeping every element's relative order.
pub fn merge_nodes(sequences: &[&[NodeEntry]]) -> Vec<NodeEntry> {
    match sequences {
        [] => Vec::new(),
        [only] => only.to_vec(),
        [first, rest @ ..] => {
            let tail = merge_nodes(rest);
            let mut merged = Vec::with_capacity(first.len() + tail.len());
            merged.extend_from_slice(first);
            merged.extend(tail);
            merged
        }
    }
}

/// Reads and writes the roster file.
#[derive(Debug, Clone)]
pub struct RosterStore {
    path: PathBuf,
    base_path: PathBuf,
}

impl RosterStore {
    pub fn new(settings: &RosterSettings) -> Self {
        Self {
            path: settings.path.clone(),
            base_path: settings.base_path.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the roster, falling back to the base template when the
    /// primary file does not exist yet.
    pub fn load(&self) -> Result<Roster> {
        let path = if self.path.exists() {
            &self.path
        } else {
            debug!(
                "Roster {} does not exist, reading base {}",
                self.path.display(),
                self.base_path.display()
            );
            &self.base_path
        };

        let contents = fs::read_to_string(path).map_err(|source| Error::RosterRead {
            path: path.clone(),
            source,
        })?;
        Roster::parse(path, &contents)
    }

    /// Overwrites the primary roster file.
    pub fn save(&self, roster: &Roster) -> Result<()> {
        self.save_to(roster, &self.path)
    }

    pub fn save_to(&self, roster: &Roster, path: &Path) -> Result<()> {
        let contents = roster.to_yaml()?;
        write_file(path, &contents).map_err(|source| Error::RosterWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Wrote {} node(s) to {}", roster.len(), path.display());
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o640);
    }
    options.open(path)?.write_all(contents.as_bytes())
}
