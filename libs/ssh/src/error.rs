//! SSH and terminal errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::retry::Cancelled;

/// Errors from dialing a node and running commands on it.
#[derive(Debug, Error)]
pub enum SshError {
    #[error("node {instance_id} has no reachable address")]
    NoAddress { instance_id: String },

    #[error("no authentication method configured for {host}")]
    NoAuthMethod { host: String },

    #[error("failed to read key material from {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("ssh error on {host}: {source}")]
    Protocol {
        host: String,
        #[source]
        source: ssh2::Error,
    },

    #[error("authentication to {host} as {user} failed")]
    Auth { host: String, user: String },

    #[error("command on {host} exited with status {status}:\n{output}")]
    CommandFailed {
        host: String,
        status: i32,
        output: String,
    },

    #[error("io error on {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("blocking ssh task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SshError {
    pub(crate) fn protocol(host: &str, source: ssh2::Error) -> Self {
        Self::Protocol {
            host: host.to_string(),
            source,
        }
    }

    pub(crate) fn io(host: &str, source: io::Error) -> Self {
        Self::Io {
            host: host.to_string(),
            source,
        }
    }

    /// Remote output captured before a command failed, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Errors from interactive terminals.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("terminal is not open")]
    NotOpen,

    #[error("terminal is already open")]
    AlreadyOpen,

    #[error("terminal session closed")]
    Closed,

    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("pty error: {0}")]
    Pty(#[from] nix::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("terminal task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
