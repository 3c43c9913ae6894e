//! Hands a roster to the external cluster engine.

use std::path::Path;

use log::info;
use tokio::process::Command;

use crate::config::ProvisionSettings;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Provisioner {
    program: String,
    args: Vec<String>,
}

impl Provisioner {
    /// `None` when no provision command is configured.
    pub fn from_settings(settings: &ProvisionSettings) -> Result<Option<Self>> {
        let Some(command) = &settings.command else {
            return Ok(None);
        };
        match command.split_first() {
            Some((program, args)) if !program.is_empty() => Ok(Some(Self {
                program: program.clone(),
                args: args.to_vec(),
            })),
            _ => Err(Error::Config("provision command is empty".into())),
        }
    }

    /// Runs the cluster engine against the roster at `roster_path`.
    pub async fn provision(&self, roster_path: &Path) -> Result<()> {
        info!(
            "Provisioning cluster: {} {} {}",
            self.program,
            self.args.join(" "),
            roster_path.display()
        );
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(roster_path)
            .status()
            .await
            .map_err(|e| Error::Provision(format!("can not run {}: {}", self.program, e)))?;
        if !status.success() {
            return Err(Error::Provision(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}
