//! Topology validation errors.

use thiserror::Error;

/// Errors raised when a cluster topology is rejected before any side effect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The cluster has no name.
    #[error("cluster name cannot be empty")]
    EmptyName,

    /// The cluster name has characters outside `[A-Za-z0-9_-]` or does not
    /// start with a letter or digit.
    #[error("invalid cluster name {0:?}: use letters, digits, '-' and '_', starting with a letter or digit")]
    InvalidName(String),

    /// The cluster has no provider.
    #[error("provider cannot be empty")]
    EmptyProvider,

    /// A cluster needs at least one master.
    #[error("master count must be at least 1, got {0}")]
    NoMaster(u32),

    /// More than one master without a shared datastore.
    #[error("{masters} masters require HA mode: set `cluster` for embedded etcd or an external `datastore`")]
    HaWithoutDatastore { masters: u32 },

    /// Embedded etcd and an external datastore were both requested.
    #[error("`cluster` (embedded etcd) and `datastore` are mutually exclusive")]
    DatastoreConflict,

    /// Datastore TLS material without a datastore endpoint.
    #[error("datastore {0} was set without a datastore endpoint")]
    DatastoreTlsWithoutEndpoint(&'static str),

    /// Datastore TLS material given both inline and as a path.
    #[error("datastore {0} was set both as content and as a path")]
    DatastoreTlsAmbiguous(&'static str),

    /// Mirror is not a `KEY=VALUE` pair.
    #[error("invalid mirror {0:?}: expected KEY=VALUE")]
    InvalidMirror(String),
}

impl ValidationError {
    /// Returns true if the error concerns the HA/datastore configuration.
    pub fn is_datastore_error(&self) -> bool {
        matches!(
            self,
            ValidationError::HaWithoutDatastore { .. }
                | ValidationError::DatastoreConflict
                | ValidationError::DatastoreTlsWithoutEndpoint(_)
                | ValidationError::DatastoreTlsAmbiguous(_)
        )
    }
}
