//! Cluster lifecycle state machine.
//!
//! ```text
//!            init_cluster                 join_nodes
//!   (none) ──────────────► Creating ──► Running ──────► Upgrading
//!                              │           ▲                │
//!                              ▼           └────────────────┘
//!                            Failed          (success or revert)
//!
//!   refresh_status: any ──► Missing when the backend is gone
//! ```
//!
//! Every operation runs under the cluster's own log dispatch, so events
//! from the operation (remote command output included) land in
//! `<data_dir>/logs/<context>.log`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use autok3s_install::{manifest_commands, node_prepare_commands, K3S_KUBECONFIG_PATH};
use autok3s_ssh::{SshError, Terminal};
use autok3s_types::{validate_name, Cluster, ClusterState, ClusterStatus, Node, NodeRole};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::Config;
use crate::error::OrchestratorError;
use crate::kubeconfig::KubeconfigFile;
use crate::logging::ClusterLog;
use crate::prompt::Prompt;
use crate::provider::Provider;
use crate::registry::NodeRegistry;
use crate::runner::{CommandRunner, SshRunner};
use crate::state::{ClusterStore, SqliteStore};
use crate::token::generate_token;

type Result<T> = std::result::Result<T, OrchestratorError>;

/// Drives create, join and delete of clusters.
pub struct Orchestrator {
    config: Config,
    store: Arc<dyn ClusterStore>,
    runner: Arc<dyn CommandRunner>,
    kubeconfig: KubeconfigFile,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        store: Arc<dyn ClusterStore>,
        runner: Arc<dyn CommandRunner>,
        cancel: CancellationToken,
    ) -> Self {
        let kubeconfig = KubeconfigFile::new(&config.kubeconfig, config.kubeconfig_lock_timeout);
        Self {
            config,
            store,
            runner,
            kubeconfig,
            cancel,
        }
    }

    /// Production wiring: SQLite state under `data_dir` and SSH execution.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = SqliteStore::open(config.state_db_path())?;
        let cancel = CancellationToken::new();
        let runner = SshRunner::new(
            config.ssh_retry.clone(),
            config.ssh_connect_timeout,
            cancel.clone(),
        );
        Ok(Self::new(config, Arc::new(store), Arc::new(runner), cancel))
    }

    /// Cancelling this token aborts dial retries and running commands.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The runner used for node commands, for providers that need one.
    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a cluster.
    ///
    /// On failure the state is left `Failed` and the instances stay in
    /// `registry`; the caller decides whether to `provider.rollback` them.
    pub async fn init_cluster(
        &self,
        provider: &dyn Provider,
        registry: &NodeRegistry,
        cluster: Cluster,
    ) -> Result<ClusterState> {
        let mut cluster = cluster;
        cluster.metadata.provider = provider.name().to_string();
        if cluster.metadata.name.trim().is_empty() {
            cluster.metadata.name = provider.generate_cluster_name();
        }
        let name = cluster.metadata.name.clone();
        validate_name(&name)?;
        let context = provider.context_name(&name);

        self.logged(
            &context,
            || info_span!("create", cluster = %name, provider = %provider.name()),
            self.create(provider, registry, cluster, &context),
        )
        .await
    }

    async fn create(
        &self,
        provider: &dyn Provider,
        registry: &NodeRegistry,
        mut cluster: Cluster,
        context: &str,
    ) -> Result<ClusterState> {
        cluster.metadata.validate()?;
        let name = cluster.metadata.name.clone();
        let provider_name = provider.name().to_string();

        if self.store.get_cluster(&name, &provider_name)?.is_some() {
            return Err(OrchestratorError::AlreadyExists {
                name,
                provider: provider_name,
            });
        }
        let (exists, ids) = provider
            .is_cluster_exist(&name, None)
            .await
            .map_err(OrchestratorError::provider(&provider_name, "check existing instances"))?;
        if exists {
            warn!(instances = ?ids, "Backend already has instances for this cluster");
            return Err(OrchestratorError::AlreadyExists {
                name,
                provider: provider_name,
            });
        }

        if cluster.metadata.token().is_none() {
            cluster.metadata.token = Some(generate_token());
        }

        let mut state = ClusterState::new(cluster, ClusterStatus::Creating);
        self.store.save_cluster_state(&state)?;
        info!(masters = state.cluster.metadata.master, workers = state.cluster.metadata.worker, "Creating cluster");

        match self.bootstrap(provider, registry, &mut state, context).await {
            Ok(()) => {
                state.transition(ClusterStatus::Running);
                self.store.save_cluster_state(&state)?;
                info!(nodes = state.cluster.status.len(), "Cluster is running");
                Ok(state)
            }
            Err(e) => {
                error!(error = %e, "Cluster creation failed");
                state.transition(ClusterStatus::Failed);
                if let Err(save) = self.store.save_cluster_state(&state) {
                    warn!(error = %save, "Failed to persist failed state");
                }
                Err(e)
            }
        }
    }

    async fn bootstrap(
        &self,
        provider: &dyn Provider,
        registry: &NodeRegistry,
        state: &mut ClusterState,
        context: &str,
    ) -> Result<()> {
        self.check_cancelled()?;
        let provider_name = provider.name().to_string();

        let mut cluster = provider
            .prepare_create(&state.cluster, registry)
            .await
            .map_err(OrchestratorError::provider(&provider_name, "prepare instances"))?;
        registry.drain_into(&mut cluster.status);
        state.cluster = cluster;
        self.store.save_cluster_state(state)?;

        let cluster = &state.cluster;
        let first = cluster
            .first_master()
            .cloned()
            .ok_or_else(|| OrchestratorError::NoMaster {
                name: cluster.metadata.name.clone(),
            })?;
        let fixed_ip = fixed_ip(cluster)?;

        for (index, node) in cluster.status.master_nodes.iter().enumerate() {
            self.install(cluster, node, index == 0, &fixed_ip).await?;
        }
        for node in &cluster.status.worker_nodes {
            self.install(cluster, node, false, &fixed_ip).await?;
        }

        self.check_cancelled()?;
        self.deploy_manifests(cluster, &first).await?;
        provider
            .deploy_extra(cluster, self.runner.as_ref())
            .await
            .map_err(OrchestratorError::provider(&provider_name, "deploy extra manifests"))?;

        self.merge_kubeconfig(cluster, &first, context).await
    }

    /// Add nodes to an existing cluster.
    ///
    /// Only `Running` clusters can be joined, and only nodes the provider
    /// marks `current` are installed. On failure the pre-join state is
    /// persisted again.
    pub async fn join_nodes(
        &self,
        provider: &dyn Provider,
        registry: &NodeRegistry,
        name: &str,
    ) -> Result<ClusterState> {
        validate_name(name)?;
        let context = provider.context_name(name);
        self.logged(
            &context,
            || info_span!("join", cluster = %name, provider = %provider.name()),
            self.join(provider, registry, name),
        )
        .await
    }

    async fn join(&self, provider: &dyn Provider, registry: &NodeRegistry, name: &str) -> Result<ClusterState> {
        let original = match self.store.get_cluster(name, provider.name())? {
            Some(state) if state.status == ClusterStatus::Running => state,
            Some(state) if state.status != ClusterStatus::Missing => {
                return Err(OrchestratorError::NotRunning {
                    name: name.to_string(),
                    status: state.status,
                })
            }
            _ => {
                return Err(OrchestratorError::NotFound {
                    name: name.to_string(),
                    provider: provider.name().to_string(),
                })
            }
        };

        let mut state = original.clone();
        state.transition(ClusterStatus::Upgrading);
        self.store.save_cluster_state(&state)?;

        match self.expand(provider, registry, &mut state).await {
            Ok(added) => {
                state.transition(ClusterStatus::Running);
                self.store.save_cluster_state(&state)?;
                info!(added, nodes = state.cluster.status.len(), "Joined nodes");
                Ok(state)
            }
            Err(e) => {
                error!(error = %e, "Join failed, keeping the existing cluster");
                let mut reverted = original;
                let status = reverted.status;
                reverted.transition(status);
                if let Err(save) = self.store.save_cluster_state(&reverted) {
                    warn!(error = %save, "Failed to revert cluster state");
                }
                Err(e)
            }
        }
    }

    async fn expand(&self, provider: &dyn Provider, registry: &NodeRegistry, state: &mut ClusterState) -> Result<usize> {
        self.check_cancelled()?;
        let provider_name = provider.name().to_string();

        let mut cluster = provider
            .prepare_join(&state.cluster, registry)
            .await
            .map_err(OrchestratorError::provider(&provider_name, "prepare joining instances"))?;
        provider
            .sync_instances(&cluster, registry)
            .await
            .map_err(OrchestratorError::provider(&provider_name, "sync existing instances"))?;
        registry.drain_into(&mut cluster.status);

        let added = registry.filter(|n| n.current);
        let (masters, workers): (Vec<Node>, Vec<Node>) = added.into_iter().partition(|n| n.master);
        cluster.metadata.validate_join(masters.len() as u32)?;
        info!(masters = masters.len(), workers = workers.len(), "Joining nodes");

        let fixed_ip = fixed_ip(&cluster)?;
        for node in masters.iter().chain(workers.iter()) {
            self.install(&cluster, node, false, &fixed_ip).await?;
        }

        state.cluster = cluster;
        Ok(masters.len() + workers.len())
    }

    /// Delete a cluster. Returns false when the operator declined.
    ///
    /// With `force` there is no prompt, and failures of individual cleanup
    /// steps are logged while the remaining steps still run.
    pub async fn delete_cluster(
        &self,
        provider: &dyn Provider,
        name: &str,
        force: bool,
        prompt: &dyn Prompt,
    ) -> Result<bool> {
        validate_name(name)?;
        let context = provider.context_name(name);
        self.logged(
            &context,
            || info_span!("delete", cluster = %name, provider = %provider.name(), force),
            self.delete(provider, name, force, prompt, &context),
        )
        .await
    }

    async fn delete(
        &self,
        provider: &dyn Provider,
        name: &str,
        force: bool,
        prompt: &dyn Prompt,
        context: &str,
    ) -> Result<bool> {
        if !force {
            let message = format!("Delete cluster {} and uninstall k3s from its nodes?", context);
            if !prompt.confirm(&message).map_err(OrchestratorError::Prompt)? {
                info!("Deletion declined");
                return Ok(false);
            }
        }

        let state = match self.store.get_cluster(name, provider.name()) {
            Ok(state) => state,
            Err(e) if force => {
                warn!(error = %e, "Failed to load cluster state");
                None
            }
            Err(e) => return Err(e.into()),
        };
        if state.is_none() && !force {
            return Err(OrchestratorError::NotFound {
                name: name.to_string(),
                provider: provider.name().to_string(),
            });
        }

        let known = state.as_ref().map(|s| &s.cluster);
        let context = match provider.delete_instances(known, name, force).await {
            Ok(context) => context,
            Err(e) if force => {
                warn!(error = %format!("{:#}", e), "Failed to delete instances");
                context.to_string()
            }
            Err(e) => return Err(OrchestratorError::provider(provider.name(), "delete instances")(e)),
        };

        match self.kubeconfig.remove_context(&context).await {
            Ok(removed) => debug!(context = %context, removed, "Cleaned kubeconfig"),
            Err(e) if force => warn!(error = %e, "Failed to clean kubeconfig"),
            Err(e) => return Err(e.into()),
        }

        match self.store.delete_cluster(name, provider.name()) {
            Ok(_) => {}
            Err(e) if force => warn!(error = %e, "Failed to delete cluster state"),
            Err(e) => return Err(e.into()),
        }

        info!("Cluster deleted");
        Ok(true)
    }

    /// Mark the cluster `Missing` when its backend instances are gone.
    pub async fn refresh_status(&self, provider: &dyn Provider, name: &str) -> Result<ClusterState> {
        let mut state = self.describe(provider.name(), name)?;
        let (exists, ids) = provider
            .is_cluster_exist(name, Some(&state.cluster))
            .await
            .map_err(OrchestratorError::provider(provider.name(), "check existing instances"))?;

        if !exists && state.status != ClusterStatus::Missing {
            warn!(cluster = %name, provider = %provider.name(), "Cluster instances are gone");
            state.transition(ClusterStatus::Missing);
            self.store.save_cluster_state(&state)?;
        } else {
            debug!(cluster = %name, instances = ids.len(), "Cluster instances present");
        }
        Ok(state)
    }

    pub fn list_clusters(&self) -> Result<Vec<ClusterState>> {
        Ok(self.store.list_clusters()?)
    }

    pub fn describe(&self, provider: &str, name: &str) -> Result<ClusterState> {
        self.store
            .get_cluster(name, provider)?
            .ok_or_else(|| OrchestratorError::NotFound {
                name: name.to_string(),
                provider: provider.to_string(),
            })
    }

    /// Shell on one node of a cluster. The terminal is not started.
    pub async fn open_terminal(
        &self,
        provider: &dyn Provider,
        name: &str,
        instance_id: &str,
    ) -> Result<Box<dyn Terminal>> {
        let state = self.describe(provider.name(), name)?;
        let node = state
            .cluster
            .status
            .find(instance_id)
            .ok_or_else(|| OrchestratorError::NodeNotFound {
                name: name.to_string(),
                instance_id: instance_id.to_string(),
            })?;

        if let Some(terminal) = provider
            .terminal(node)
            .await
            .map_err(OrchestratorError::provider(provider.name(), "open terminal"))?
        {
            return Ok(terminal);
        }

        let target = target(&state.cluster, node);
        self.runner
            .shell(&target)
            .await
            .map_err(OrchestratorError::node(instance_id, "open shell"))
    }

    async fn install(&self, cluster: &Cluster, node: &Node, is_first_master: bool, fixed_ip: &str) -> Result<()> {
        self.check_cancelled()?;
        let extra_args = match node.role() {
            NodeRole::Master => cluster.metadata.master_extra_args(),
            NodeRole::Worker => cluster.metadata.worker_extra_args(),
        }
        .unwrap_or_default();

        let mut commands = node_prepare_commands(cluster, node);
        commands.push(autok3s_install::build(
            cluster,
            node,
            is_first_master,
            fixed_ip,
            extra_args,
        ));

        info!(instance_id = %node.instance_id, role = %node.role(), first = is_first_master, "Installing k3s");
        self.runner
            .run(&target(cluster, node), &commands)
            .await
            .map_err(OrchestratorError::node(&node.instance_id, "install k3s"))?;
        info!(instance_id = %node.instance_id, "Node is ready");
        Ok(())
    }

    async fn deploy_manifests(&self, cluster: &Cluster, master: &Node) -> Result<()> {
        let Some(path) = cluster.metadata.manifests.as_deref() else {
            return Ok(());
        };

        let manifests = read_manifests(path).await?;
        if manifests.is_empty() {
            debug!(path = %path.display(), "No manifests to deploy");
            return Ok(());
        }
        let commands = manifest_commands(manifests.iter().map(|(n, c)| (n.as_str(), c.as_str())));

        info!(count = manifests.len(), "Deploying manifests");
        self.runner
            .run(&target(cluster, master), &commands)
            .await
            .map_err(OrchestratorError::node(&master.instance_id, "deploy manifests"))?;
        Ok(())
    }

    async fn merge_kubeconfig(&self, cluster: &Cluster, master: &Node, context: &str) -> Result<()> {
        self.check_cancelled()?;
        let raw = self
            .runner
            .run(&target(cluster, master), &[format!("cat {}", K3S_KUBECONFIG_PATH)])
            .await
            .map_err(OrchestratorError::node(&master.instance_id, "fetch kubeconfig"))?;

        let server_ip = master.address().ok_or_else(|| no_address(master))?;
        self.kubeconfig.merge(context, &raw, server_ip).await?;
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        Ok(())
    }

    /// Run `operation` under the cluster's log dispatch, inside a span
    /// created against that dispatch.
    async fn logged<T, S, F>(&self, context: &str, span: S, operation: F) -> Result<T>
    where
        S: FnOnce() -> Span,
        F: Future<Output = Result<T>>,
    {
        let log_dir = self.config.log_dir();
        let log = ClusterLog::open(&log_dir, context, &self.config.log_level).map_err(|source| {
            OrchestratorError::Log {
                path: log_file(&log_dir, context),
                source,
            }
        })?;

        let dispatch = log.dispatch().clone();
        let span = tracing::dispatcher::with_default(&dispatch, span);
        operation.instrument(span).with_subscriber(dispatch).await
    }
}

fn log_file(log_dir: &Path, context: &str) -> PathBuf {
    log_dir.join(format!("{}.log", context))
}

/// `node` with its effective credentials.
fn target(cluster: &Cluster, node: &Node) -> Node {
    let mut target = node.clone();
    target.ssh = cluster.credentials_for(node);
    target
}

fn no_address(node: &Node) -> OrchestratorError {
    OrchestratorError::node(&node.instance_id, "resolve address")(SshError::NoAddress {
        instance_id: node.instance_id.clone(),
    })
}

/// The bootstrap master's address.
fn fixed_ip(cluster: &Cluster) -> Result<String> {
    let first = cluster.first_master().ok_or_else(|| OrchestratorError::NoMaster {
        name: cluster.metadata.name.clone(),
    })?;
    cluster
        .fixed_ip()
        .map(str::to_string)
        .ok_or_else(|| no_address(first))
}

/// A manifest file, or the `*.yaml`/`*.yml` files of a directory in name
/// order.
async fn read_manifests(path: &Path) -> Result<Vec<(String, String)>> {
    let io_err = |source| OrchestratorError::Manifests {
        path: path.to_path_buf(),
        source,
    };

    let metadata = tokio::fs::metadata(path).await.map_err(io_err)?;
    let files = if metadata.is_dir() {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let file = entry.path();
            let is_yaml = matches!(
                file.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if is_yaml && entry.file_type().await.map_err(io_err)?.is_file() {
                files.push(file);
            }
        }
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut manifests = Vec::with_capacity(files.len());
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = tokio::fs::read_to_string(&file).await.map_err(io_err)?;
        manifests.push((name, content));
    }
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_manifests_from_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "kind: B").unwrap();
        std::fs::write(dir.path().join("a.yml"), "kind: A").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();
        std::fs::create_dir(dir.path().join("nested.yaml")).unwrap();

        let manifests = read_manifests(dir.path()).await.unwrap();
        assert_eq!(
            manifests,
            vec![
                ("a.yml".to_string(), "kind: A".to_string()),
                ("b.yaml".to_string(), "kind: B".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_single_manifest() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("ccm.yaml");
        std::fs::write(&file, "kind: Deployment").unwrap();

        let manifests = read_manifests(&file).await.unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].0, "ccm.yaml");
    }

    #[tokio::test]
    async fn test_missing_manifest_path() {
        let dir = tempdir().unwrap();
        let err = read_manifests(&dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Manifests { .. }));
    }

    #[test]
    fn test_target_merges_credentials() {
        let mut cluster = Cluster::default();
        cluster.ssh.user = "ubuntu".to_string();
        cluster.ssh.password = Some("secret".to_string());
        let mut node = Node::new("i-1", true);
        node.ssh.user = "admin".to_string();

        let merged = target(&cluster, &node);
        assert_eq!(merged.ssh.user, "admin");
        assert_eq!(merged.ssh.password.as_deref(), Some("secret"));
    }
}
