use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("couldn't spawn '{program}': {source}")]
    Spawn { program: String, source: io::Error },

    #[error("'{program}' closed its stdout mid-exchange")]
    ChildEof { program: String },

    #[error("unexpected reply from '{program}': '{reply}'")]
    ChildReply { program: String, reply: String },

    #[error("'{what}' is already closed")]
    Closed { what: String },

    #[error("couldn't create fifo {path}: {source}")]
    Fifo { path: PathBuf, source: nix::Error },

    #[error("missing config file: {0}")]
    MissingConfig(PathBuf),

    #[error("couldn't parse service config {path}: {source}")]
    ServiceConfig {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("bad configuration: {0}")]
    Config(String),

    #[error("malformed state line: '{0}'")]
    MalformedState(String),

    #[error("state stream ended before EOF marker")]
    TruncatedState,
}

impl Error {
    /// True for the load failures that trigger context-restart recovery,
    /// as opposed to resource errors that surface to the caller.
    pub fn is_corrupt_state(&self) -> bool {
        matches!(self, Error::MalformedState(_) | Error::TruncatedState)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
