//! Error types shared by the lifecycle and roster managers.

use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::EngineError;

/// Result type alias for cube operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required argument or setting is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An engine call failed. `context` names the step and the target.
    #[error("{context}: {source}")]
    Engine {
        context: String,
        #[source]
        source: EngineError,
    },

    #[error("invalid image reference [{0}]")]
    InvalidReference(String),

    #[error("error while determining supported engine version [{version}]: {reason}")]
    EngineVersion { version: String, reason: String },

    #[error("can not read roster file [{}]: {source}", .path.display())]
    RosterRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can not parse roster file [{}]: {source}", .path.display())]
    RosterParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("can not write roster file [{}]: {source}", .path.display())]
    RosterWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can not encode roster: {0}")]
    RosterEncode(#[from] serde_yaml::Error),

    #[error("cluster provisioning failed: {0}")]
    Provision(String),
}

impl Error {
    /// Wraps an engine failure with the step that produced it.
    pub fn engine(context: impl Into<String>, source: EngineError) -> Self {
        Error::Engine {
            context: context.into(),
            source,
        }
    }
}
