//! Persisted cluster state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::Cluster;

/// Lifecycle status of a persisted cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterStatus {
    /// Instances are being created and bootstrapped.
    Creating,
    /// Bootstrap finished; the cluster is usable.
    Running,
    /// Nodes are being joined.
    Upgrading,
    /// Creation failed; backend resources may need rollback.
    Failed,
    /// The backend resources disappeared out of band.
    Missing,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Running => "Running",
            Self::Upgrading => "Upgrading",
            Self::Failed => "Failed",
            Self::Missing => "Missing",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown cluster status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for ClusterStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Creating" => Ok(Self::Creating),
            "Running" => Ok(Self::Running),
            "Upgrading" => Ok(Self::Upgrading),
            "Failed" => Ok(Self::Failed),
            "Missing" => Ok(Self::Missing),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Durable projection of a cluster, keyed by `(name, provider)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub cluster: Cluster,
    pub status: ClusterStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClusterState {
    /// A fresh state for `cluster`.
    pub fn new(cluster: Cluster, status: ClusterStatus) -> Self {
        let now = Utc::now();
        Self {
            cluster,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn name(&self) -> &str {
        &self.cluster.metadata.name
    }

    pub fn provider(&self) -> &str {
        &self.cluster.metadata.provider
    }

    /// Move to `status`, bumping `updated_at`.
    pub fn transition(&mut self, status: ClusterStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
