//! Compute backend interface.
//!
//! A provider owns backend instance lifecycle: it creates or describes
//! instances, records them in the [`NodeRegistry`] and deletes them again.
//! The orchestrator owns everything else.

mod native;

use anyhow::Result;
use async_trait::async_trait;
use autok3s_ssh::Terminal;
use autok3s_types::{Cluster, Node};

use crate::registry::NodeRegistry;
use crate::runner::CommandRunner;

pub use native::{NativeOptions, NativeProvider};

/// Backend hooks consumed by the orchestrator.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, part of the state key.
    fn name(&self) -> &str;

    /// Name used when the operator did not choose one.
    fn generate_cluster_name(&self) -> String {
        format!("autok3s-{}", hex::encode(rand::random::<[u8; 4]>()))
    }

    /// Kubeconfig context for cluster `name`.
    fn context_name(&self, name: &str) -> String {
        format!("{}.{}", name, self.name())
    }

    /// Create or describe the instances of a new cluster.
    ///
    /// Every instance is stored in `registry` with `current` set, and with
    /// `rollback` set when deleting it is safe. Returns the cluster to
    /// bootstrap; the orchestrator fills its node lists from the registry.
    async fn prepare_create(&self, cluster: &Cluster, registry: &NodeRegistry) -> Result<Cluster>;

    /// Create or describe the instances joining `cluster`, flagged like
    /// [`prepare_create`](Provider::prepare_create).
    async fn prepare_join(&self, cluster: &Cluster, registry: &NodeRegistry) -> Result<Cluster>;

    /// Refresh instances that already belong to `cluster`. They must not be
    /// marked `current`.
    async fn sync_instances(&self, cluster: &Cluster, registry: &NodeRegistry) -> Result<()> {
        for node in cluster.status.nodes() {
            let mut node = node.clone();
            node.current = false;
            node.rollback = false;
            registry.store_or_update(node);
        }
        Ok(())
    }

    /// Backend add-ons (cloud controller, CSI) applied after bootstrap.
    async fn deploy_extra(&self, _cluster: &Cluster, _runner: &dyn CommandRunner) -> Result<()> {
        Ok(())
    }

    /// Delete every registry entry with `current && rollback`.
    async fn rollback(&self, registry: &NodeRegistry) -> Result<()>;

    /// Whether the backend still has instances for cluster `name`, and
    /// their ids. `known` is the persisted cluster, when there is one.
    async fn is_cluster_exist(&self, name: &str, known: Option<&Cluster>) -> Result<(bool, Vec<String>)>;

    /// Delete every instance of cluster `name` and return its context name.
    /// With `force`, per-instance failures are skipped.
    async fn delete_instances(&self, known: Option<&Cluster>, name: &str, force: bool) -> Result<String>;

    /// Backend-native shell for `node`, when SSH is not the way in.
    async fn terminal(&self, _node: &Node) -> Result<Option<Box<dyn Terminal>>> {
        Ok(None)
    }
}
