//! Bare SSH hosts.
//!
//! The native provider never creates machines: the operator lists host
//! addresses and each host becomes a node whose instance id is its address.
//! Rollback and delete uninstall K3s from the hosts instead of destroying
//! them.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use autok3s_install::uninstall_command;
use autok3s_types::{Cluster, Node};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Provider;
use crate::registry::NodeRegistry;
use crate::runner::CommandRunner;

pub const PROVIDER_NAME: &str = "native";

/// Host lists for a native cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeOptions {
    #[serde(default)]
    pub master_ips: Vec<String>,

    #[serde(default)]
    pub worker_ips: Vec<String>,
}

impl NativeOptions {
    fn from_cluster(cluster: &Cluster) -> Result<Self> {
        if cluster.options.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(cluster.options.clone()).context("invalid native provider options")
    }
}

/// Provider for hosts reachable over SSH.
pub struct NativeProvider {
    options: NativeOptions,
    runner: Arc<dyn CommandRunner>,
}

impl NativeProvider {
    /// `options` lists the hosts to add: all hosts on create, new hosts on
    /// join.
    pub fn new(options: NativeOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self { options, runner }
    }

    fn register(&self, cluster: &Cluster, registry: &NodeRegistry, skip: &HashSet<&str>) -> usize {
        let hosts = self
            .options
            .master_ips
            .iter()
            .map(|ip| (ip, true))
            .chain(self.options.worker_ips.iter().map(|ip| (ip, false)));

        let mut added = 0;
        for (ip, master) in hosts {
            let ip = ip.trim();
            if ip.is_empty() || skip.contains(ip) {
                continue;
            }
            let mut node = Node::new(ip, master);
            node.public_ip_address = vec![ip.to_string()];
            node.current = true;
            node.rollback = true;
            node.instance_status = "running".to_string();
            node.ssh = cluster.ssh.clone();
            registry.store_or_update(node);
            added += 1;
        }
        added
    }

    /// Uninstall K3s from `nodes`. Every node is attempted; the first
    /// failure is returned unless `force`.
    async fn uninstall(&self, cluster: Option<&Cluster>, nodes: Vec<Node>, force: bool) -> Result<()> {
        let mut first_error = None;
        for node in nodes {
            let mut target = node.clone();
            if let Some(cluster) = cluster {
                target.ssh = cluster.credentials_for(&node);
            }

            info!(instance_id = %node.instance_id, role = %node.role(), "Uninstalling k3s");
            let command = uninstall_command(node.role());
            if let Err(e) = self.runner.run(&target, &[command]).await {
                warn!(instance_id = %node.instance_id, error = %e, "Failed to uninstall k3s");
                if !force && first_error.is_none() {
                    first_error = Some(anyhow::Error::new(e).context(format!(
                        "failed to uninstall k3s from {}",
                        node.instance_id
                    )));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for NativeProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn prepare_create(&self, cluster: &Cluster, registry: &NodeRegistry) -> Result<Cluster> {
        if self.options.master_ips.iter().all(|ip| ip.trim().is_empty()) {
            bail!("native clusters need at least one master ip");
        }

        let added = self.register(cluster, registry, &HashSet::new());
        info!(hosts = added, "Registered native hosts");

        let ids = |master: bool| -> Vec<String> {
            registry
                .filter(|n| n.master == master)
                .into_iter()
                .map(|n| n.instance_id)
                .collect()
        };
        let options = NativeOptions {
            master_ips: ids(true),
            worker_ips: ids(false),
        };

        let mut prepared = cluster.clone();
        prepared.metadata.master = options.master_ips.len() as u32;
        prepared.metadata.worker = options.worker_ips.len() as u32;
        prepared.options = serde_json::to_value(&options)?;
        Ok(prepared)
    }

    async fn prepare_join(&self, cluster: &Cluster, registry: &NodeRegistry) -> Result<Cluster> {
        let existing: HashSet<&str> = cluster
            .status
            .nodes()
            .map(|n| n.instance_id.as_str())
            .collect();
        let added = self.register(cluster, registry, &existing);
        if added == 0 {
            bail!("no new hosts to join");
        }
        info!(hosts = added, "Registered joining native hosts");

        let mut prepared = cluster.clone();
        let joining = registry.filter(|n| n.current);
        prepared.metadata.master += joining.iter().filter(|n| n.master).count() as u32;
        prepared.metadata.worker += joining.iter().filter(|n| !n.master).count() as u32;

        let mut options = NativeOptions::from_cluster(cluster)?;
        for node in &joining {
            let list = if node.master {
                &mut options.master_ips
            } else {
                &mut options.worker_ips
            };
            list.push(node.instance_id.clone());
        }
        prepared.options = serde_json::to_value(&options)?;
        Ok(prepared)
    }

    async fn rollback(&self, registry: &NodeRegistry) -> Result<()> {
        let targets = registry.filter(|n| n.current && n.rollback);
        info!(nodes = targets.len(), "Rolling back native hosts");
        self.uninstall(None, targets, false).await
    }

    async fn is_cluster_exist(&self, _name: &str, known: Option<&Cluster>) -> Result<(bool, Vec<String>)> {
        let ids = known
            .map(|c| c.status.nodes().map(|n| n.instance_id.clone()).collect())
            .unwrap_or_default();
        Ok((known.is_some(), ids))
    }

    async fn delete_instances(&self, known: Option<&Cluster>, name: &str, force: bool) -> Result<String> {
        if let Some(cluster) = known {
            let nodes = cluster.status.nodes().cloned().collect();
            self.uninstall(Some(cluster), nodes, force).await?;
        }
        Ok(self.context_name(name))
    }
}
