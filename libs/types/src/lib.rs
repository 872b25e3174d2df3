//! # autok3s-types
//!
//! Shared models for the autok3s cluster provisioning orchestrator.
//!
//! ## Model
//!
//! - [`Node`]: one backend instance (VM, container or bare host) with its
//!   addresses, lifecycle flags and SSH credentials
//! - [`Cluster`]: desired topology ([`Metadata`]), the ordered node lists
//!   ([`Status`]), default SSH credentials and opaque provider options
//! - [`ClusterState`]: the persisted projection of a cluster, keyed by
//!   `(name, provider)` and carrying a [`ClusterStatus`]
//!
//! Ordering matters: `Status::master_nodes[0]` is the bootstrap master whose
//! address every other node joins through.

mod cluster;
mod error;
mod node;
mod state;

pub use cluster::{validate_name, Cluster, Metadata, Status, DEFAULT_INSTALL_SCRIPT};
pub use error::ValidationError;
pub use node::{Node, NodeRole, SshCredentials};
pub use state::{ClusterState, ClusterStatus, ParseStatusError};
