//! Orchestrator error types.

use std::io;
use std::path::PathBuf;

use autok3s_ssh::SshError;
use autok3s_types::{ClusterStatus, ValidationError};
use thiserror::Error;

use crate::kubeconfig::KubeconfigError;
use crate::state::StoreError;

/// Errors from cluster lifecycle operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid cluster topology: {0}")]
    Validation(#[from] ValidationError),

    #[error("cluster {name} already exists on provider {provider}")]
    AlreadyExists { name: String, provider: String },

    #[error("cluster {name} not found on provider {provider}")]
    NotFound { name: String, provider: String },

    #[error("cluster {name} is {status}; only running clusters accept new nodes")]
    NotRunning { name: String, status: ClusterStatus },

    #[error("node {instance_id} not found in cluster {name}")]
    NodeNotFound { name: String, instance_id: String },

    #[error("cluster {name} has no master node")]
    NoMaster { name: String },

    #[error("provider {provider} failed to {step}: {source:#}")]
    Provider {
        provider: String,
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{step} failed on node {instance_id}: {source}")]
    Node {
        instance_id: String,
        step: &'static str,
        #[source]
        source: SshError,
    },

    #[error("failed to read manifests from {path}: {source}")]
    Manifests {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open cluster log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("confirmation prompt failed: {0}")]
    Prompt(#[source] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Kubeconfig(#[from] KubeconfigError),

    #[error("operation cancelled")]
    Cancelled,
}

impl OrchestratorError {
    pub(crate) fn provider(provider: &str, step: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        let provider = provider.to_string();
        move |source| Self::Provider {
            provider,
            step,
            source,
        }
    }

    pub(crate) fn node(instance_id: &str, step: &'static str) -> impl FnOnce(SshError) -> Self {
        let instance_id = instance_id.to_string();
        move |source| match source {
            SshError::Cancelled(_) => Self::Cancelled,
            source => Self::Node {
                instance_id,
                step,
                source,
            },
        }
    }

    /// Remote output attached to a failed node command.
    pub fn remote_output(&self) -> Option<&str> {
        match self {
            Self::Node { source, .. } => source.output(),
            _ => None,
        }
    }
}
