//! Cluster state persistence.
//!
//! The orchestrator only needs a key-value view keyed by
//! `(name, provider)`; [`SqliteStore`] is the durable implementation.

mod store;

use autok3s_types::ClusterState;

pub use store::{SqliteStore, StoreError};

/// Persistence seam for [`ClusterState`]. Last write wins.
pub trait ClusterStore: Send + Sync {
    /// Insert or replace the state for its `(name, provider)`.
    fn save_cluster_state(&self, state: &ClusterState) -> Result<(), StoreError>;

    fn get_cluster(&self, name: &str, provider: &str) -> Result<Option<ClusterState>, StoreError>;

    /// Remove the state. Returns false when nothing was stored.
    fn delete_cluster(&self, name: &str, provider: &str) -> Result<bool, StoreError>;

    /// Every stored cluster, oldest first.
    fn list_clusters(&self) -> Result<Vec<ClusterState>, StoreError>;
}
