//! Command handlers behind the `server` and `node` subcommands.

pub mod node;
pub mod server;

/// Name of this host, used to label engine log lines.
pub fn host_label() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
