//! cube command line entry point.

use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};
use log::{debug, error};

mod commands;
mod config;
mod error;
mod provision;
mod roster;
mod runtime;
mod types;

use commands::node::{self, NodeArgs};
use commands::server::{self, ServerArgs};
use config::Config;

/// RancherCUBE CLI, managing cube services
#[derive(Debug, Parser)]
#[command(name = "cube", version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, env = "CUBE_DEBUG", value_parser = FalseyValueParser::new())]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Operations with the cube api-server
    #[command(alias = "s")]
    Server(ServerArgs),
    /// Manage the Kubernetes node roster
    #[command(alias = "n")]
    Node(NodeArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // Load configuration
    let cfg = Config::load()?;
    debug!("Loaded configuration: {:?}", cfg);

    let result = match cli.command {
        Command::Server(args) => server::execute(args, &cfg).await,
        Command::Node(args) => node::execute(args, &cfg).await,
    };

    if let Err(e) = result {
        error!("cube error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_accepts_numeric_env_values() {
        std::env::set_var("CUBE_DEBUG", "1");
        let cli = Cli::try_parse_from(["cube", "node", "ls"]).unwrap();
        assert!(cli.debug);

        std::env::set_var("CUBE_DEBUG", "0");
        let cli = Cli::try_parse_from(["cube", "node", "ls"]).unwrap();
        assert!(!cli.debug);

        std::env::remove_var("CUBE_DEBUG");
        let cli = Cli::try_parse_from(["cube", "-d", "server", "status"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(cli.command, Command::Server(_)));
    }
}
