//! Integration tests for the cluster lifecycle.
//!
//! These drive the orchestrator end to end against an in-memory SQLite
//! store, a recording MockRunner and a tempdir kubeconfig:
//! 1. create bootstraps masters then workers and merges the kubeconfig
//! 2. join installs only the nodes it added
//! 3. delete honours the prompt and `force`
//!
//! FanOutProvider stands in for a cloud backend that creates instances
//! from parallel tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use autok3s_orchestrator::{
    ClusterStore, Config, FixedPrompt, KubeconfigFile, MockRunner, NativeOptions,
    NativeProvider, NodeRegistry, Orchestrator, OrchestratorError, Provider, SqliteStore,
};
use autok3s_types::{Cluster, ClusterStatus, Metadata, Node, SshCredentials, ValidationError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "dd73df9b22f8ff22be0d17ec36e7267a";

struct Harness {
    orchestrator: Orchestrator,
    runner: Arc<MockRunner>,
    store: Arc<SqliteStore>,
    config: Config,
    cancel: CancellationToken,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let runner = Arc::new(MockRunner::new());
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            config.clone(),
            store.clone(),
            runner.clone(),
            cancel.clone(),
        );
        Self {
            orchestrator,
            runner,
            store,
            config,
            cancel,
            _dir: dir,
        }
    }

    fn native(&self, masters: &[&str], workers: &[&str]) -> NativeProvider {
        let options = NativeOptions {
            master_ips: masters.iter().map(|s| s.to_string()).collect(),
            worker_ips: workers.iter().map(|s| s.to_string()).collect(),
        };
        NativeProvider::new(options, self.runner.clone())
    }

    fn kubeconfig(&self) -> KubeconfigFile {
        KubeconfigFile::new(&self.config.kubeconfig, self.config.kubeconfig_lock_timeout)
    }

    fn status(&self, name: &str, provider: &str) -> Option<ClusterStatus> {
        self.store
            .get_cluster(name, provider)
            .unwrap()
            .map(|state| state.status)
    }

    fn touched(&self) -> Vec<String> {
        self.runner
            .calls()
            .into_iter()
            .map(|call| call.instance_id)
            .collect()
    }
}

fn fixture_cluster() -> Cluster {
    let mut cluster = Cluster::new(Metadata {
        name: "demo".to_string(),
        master: 1,
        worker: 2,
        k3s_version: Some("v1.24.3+k3s1".to_string()),
        token: Some(TOKEN.to_string()),
        tls_sans: vec!["2.3.4.5".to_string()],
        cluster: true,
        ..Default::default()
    });
    cluster.ssh = SshCredentials {
        user: "root".to_string(),
        password: Some("hunter2".to_string()),
        ..Default::default()
    };
    cluster
}

/// Creates instances from parallel threads, like a cloud backend.
struct FanOutProvider {
    workers: usize,
    present: AtomicBool,
    rolled_back: Mutex<Vec<String>>,
}

impl FanOutProvider {
    fn new(workers: usize) -> Self {
        Self {
            workers,
            present: AtomicBool::new(false),
            rolled_back: Mutex::new(Vec::new()),
        }
    }

    fn instance(id: &str, master: bool, ip: &str) -> Node {
        let mut node = Node::new(id, master);
        node.public_ip_address = vec![ip.to_string()];
        node.instance_status = "pending".to_string();
        node.current = true;
        node.rollback = true;
        node
    }
}

#[async_trait]
impl Provider for FanOutProvider {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn prepare_create(&self, cluster: &Cluster, registry: &NodeRegistry) -> AnyResult<Cluster> {
        registry.store_or_update(Self::instance("i-m0", true, "3.3.3.1"));

        std::thread::scope(|scope| {
            for i in 0..self.workers {
                scope.spawn(move || {
                    let mut node = Self::instance(&format!("i-w{}", i), false, &format!("3.3.3.{}", 10 + i));
                    // A reused instance that must survive rollback.
                    node.rollback = i != 2;
                    registry.store_or_update(node.clone());
                    node.instance_status = "running".to_string();
                    registry.store_or_update(node);
                });
            }
        });

        self.present.store(true, Ordering::SeqCst);
        Ok(cluster.clone())
    }

    async fn prepare_join(&self, cluster: &Cluster, registry: &NodeRegistry) -> AnyResult<Cluster> {
        registry.store_or_update(Self::instance("i-w-join", false, "3.3.3.99"));
        Ok(cluster.clone())
    }

    async fn rollback(&self, registry: &NodeRegistry) -> AnyResult<()> {
        let mut rolled_back = self.rolled_back.lock().unwrap();
        for node in registry.filter(|n| n.current && n.rollback) {
            rolled_back.push(node.instance_id);
        }
        Ok(())
    }

    async fn is_cluster_exist(&self, _name: &str, _known: Option<&Cluster>) -> AnyResult<(bool, Vec<String>)> {
        let present = self.present.load(Ordering::SeqCst);
        Ok((present, Vec::new()))
    }

    async fn delete_instances(&self, _known: Option<&Cluster>, name: &str, _force: bool) -> AnyResult<String> {
        self.present.store(false, Ordering::SeqCst);
        Ok(self.context_name(name))
    }
}

#[tokio::test]
async fn test_create_bootstraps_fixture_topology() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1"], &["1.2.3.5", "1.2.3.6"]);
    let registry = NodeRegistry::new();

    let state = h
        .orchestrator
        .init_cluster(&provider, &registry, fixture_cluster())
        .await
        .unwrap();

    assert_eq!(state.status, ClusterStatus::Running);
    assert_eq!(h.status("demo", "native"), Some(ClusterStatus::Running));
    assert_eq!(state.cluster.status.master_nodes.len(), 1);
    assert_eq!(state.cluster.status.worker_nodes.len(), 2);

    // master[0] first, then workers, then the kubeconfig fetch from master[0]
    assert_eq!(h.touched(), vec!["1.2.3.1", "1.2.3.5", "1.2.3.6", "1.2.3.1"]);

    let master = h.runner.commands_for("1.2.3.1");
    assert_eq!(
        master[0],
        "curl -sLS https://get.k3s.io | INSTALL_K3S_EXEC='server --cluster-init \
         --node-external-ip=1.2.3.1 --tls-san=1.2.3.1 --tls-san=2.3.4.5' \
         INSTALL_K3S_VERSION='v1.24.3+k3s1' \
         K3S_TOKEN='dd73df9b22f8ff22be0d17ec36e7267a' sh -"
    );
    assert_eq!(master[1], "cat /etc/rancher/k3s/k3s.yaml");

    for worker in ["1.2.3.5", "1.2.3.6"] {
        let commands = h.runner.commands_for(worker);
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("K3S_URL='https://1.2.3.1:6443'"));
        assert!(!commands[0].contains("server"));
    }

    let kubeconfig = std::fs::read_to_string(&h.config.kubeconfig).unwrap();
    assert!(kubeconfig.contains("server: https://1.2.3.1:6443"));
    assert!(!kubeconfig.contains("127.0.0.1"));
    assert_eq!(h.kubeconfig().contexts().await.unwrap(), vec!["demo.native"]);

    let log = std::fs::read_to_string(h.config.log_dir().join("demo.native.log")).unwrap();
    assert!(log.contains("Installing k3s"));
    assert!(log.contains("Cluster is running"));
}

#[tokio::test]
async fn test_create_generates_name_and_token() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1"], &[]);
    let mut cluster = fixture_cluster();
    cluster.metadata.name.clear();
    cluster.metadata.token = None;

    let state = h
        .orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), cluster)
        .await
        .unwrap();

    assert!(state.name().starts_with("autok3s-"));
    let token = state.cluster.metadata.token.clone().unwrap();
    assert_eq!(token.len(), 32);
    assert!(h.runner.commands_for("1.2.3.1")[0].contains(&format!("K3S_TOKEN='{}'", token)));
}

#[tokio::test]
async fn test_create_uploads_manifests_and_registries() {
    let h = Harness::new();
    let manifests = tempfile::tempdir().unwrap();
    std::fs::write(manifests.path().join("ccm.yaml"), "kind: Deployment\n").unwrap();

    let mut cluster = fixture_cluster();
    cluster.metadata.manifests = Some(manifests.path().to_path_buf());
    cluster.metadata.registry_content = Some("mirrors: {}\n".to_string());
    let provider = h.native(&["1.2.3.1"], &["1.2.3.5"]);

    h.orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), cluster)
        .await
        .unwrap();

    let master = h.runner.commands_for("1.2.3.1");
    assert!(master[0].contains("/etc/rancher/k3s/registries.yaml"));
    assert!(master[1].starts_with("curl -sLS"));
    assert!(master
        .iter()
        .any(|c| c.contains("/var/lib/rancher/k3s/server/manifests/ccm.yaml")));

    let worker = h.runner.commands_for("1.2.3.5");
    assert!(worker[0].contains("/etc/rancher/k3s/registries.yaml"));
    assert!(!worker.iter().any(|c| c.contains("manifests")));
}

#[tokio::test]
async fn test_create_failure_leaves_failed_state_for_rollback() {
    let h = Harness::new();
    h.runner.fail_on("i-w1", "curl: (6) Could not resolve host: get.k3s.io");
    let provider = FanOutProvider::new(4);
    let registry = NodeRegistry::new();
    let mut cluster = fixture_cluster();
    cluster.metadata.worker = 4;

    let err = h
        .orchestrator
        .init_cluster(&provider, &registry, cluster)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Node { ref instance_id, .. } if instance_id == "i-w1"));
    assert_eq!(
        err.remote_output(),
        Some("curl: (6) Could not resolve host: get.k3s.io")
    );
    assert_eq!(h.status("demo", "fanout"), Some(ClusterStatus::Failed));

    // the loop stops at the failing node
    let touched = h.touched();
    assert_eq!(touched.first().map(String::as_str), Some("i-m0"));
    assert_eq!(touched.last().map(String::as_str), Some("i-w1"));
    assert!(h.kubeconfig().contexts().await.unwrap().is_empty());

    provider.rollback(&registry).await.unwrap();
    let mut rolled_back = provider.rolled_back.lock().unwrap().clone();
    rolled_back.sort();
    assert_eq!(rolled_back, vec!["i-m0", "i-w0", "i-w1", "i-w3"]);
}

#[tokio::test]
async fn test_create_rejects_existing_cluster() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1"], &[]);
    h.orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();
    let calls = h.runner.calls().len();

    let err = h
        .orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::AlreadyExists { .. }));
    assert_eq!(h.runner.calls().len(), calls);
    assert_eq!(h.status("demo", "native"), Some(ClusterStatus::Running));
}

#[tokio::test]
async fn test_invalid_topology_has_no_side_effects() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1", "1.2.3.2"], &[]);
    let mut cluster = fixture_cluster();
    cluster.metadata.master = 2;
    cluster.metadata.cluster = false;

    let err = h
        .orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), cluster)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::HaWithoutDatastore { masters: 2 })
    ));
    assert!(h.store.list_clusters().unwrap().is_empty());
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_names_outside_log_dir_rejected() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1"], &[]);
    let mut cluster = fixture_cluster();
    cluster.metadata.name = "../../escape".to_string();

    let err = h
        .orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), cluster)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::InvalidName(_))
    ));

    let err = h
        .orchestrator
        .delete_cluster(&provider, "a/b", true, &FixedPrompt(true))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    assert!(h.runner.calls().is_empty());
    assert!(!h.config.log_dir().exists());
}

#[tokio::test]
async fn test_cancelled_create_is_failed() {
    let h = Harness::new();
    h.cancel.cancel();
    let provider = h.native(&["1.2.3.1"], &[]);

    let err = h
        .orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Cancelled));
    assert_eq!(h.status("demo", "native"), Some(ClusterStatus::Failed));
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_join_installs_only_added_nodes() {
    let h = Harness::new();
    let create = h.native(&["1.2.3.1"], &["1.2.3.5"]);
    h.orchestrator
        .init_cluster(&create, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();
    let before = h.runner.calls().len();

    let join = h.native(&[], &["1.2.3.5", "1.2.3.7"]);
    let state = h
        .orchestrator
        .join_nodes(&join, &NodeRegistry::new(), "demo")
        .await
        .unwrap();

    let joined: Vec<_> = h.runner.calls()[before..]
        .iter()
        .map(|call| call.instance_id.clone())
        .collect();
    assert_eq!(joined, vec!["1.2.3.7"]);
    assert!(h.runner.commands_for("1.2.3.7")[0].contains("K3S_URL='https://1.2.3.1:6443'"));

    assert_eq!(state.status, ClusterStatus::Running);
    assert_eq!(state.cluster.status.worker_nodes.len(), 2);
    assert_eq!(state.cluster.metadata.worker, 2);
    assert_eq!(
        state.cluster.options["worker_ips"],
        serde_json::json!(["1.2.3.5", "1.2.3.7"])
    );
    let stored = h.store.get_cluster("demo", "native").unwrap().unwrap();
    assert_eq!(stored.cluster.status.len(), 3);
}

#[tokio::test]
async fn test_join_failure_reverts_to_running() {
    let h = Harness::new();
    let create = h.native(&["1.2.3.1"], &["1.2.3.5"]);
    h.orchestrator
        .init_cluster(&create, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();
    h.runner.fail_on("1.2.3.7", "connection reset");

    let join = h.native(&[], &["1.2.3.7"]);
    let err = h
        .orchestrator
        .join_nodes(&join, &NodeRegistry::new(), "demo")
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Node { .. }));
    let stored = h.store.get_cluster("demo", "native").unwrap().unwrap();
    assert_eq!(stored.status, ClusterStatus::Running);
    assert_eq!(stored.cluster.status.worker_nodes.len(), 1);
}

#[tokio::test]
async fn test_join_refused_on_failed_cluster() {
    let h = Harness::new();
    h.runner.fail_on("1.2.3.5", "curl: (7) Failed to connect");
    let create = h.native(&["1.2.3.1"], &["1.2.3.5"]);
    h.orchestrator
        .init_cluster(&create, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap_err();
    assert_eq!(h.status("demo", "native"), Some(ClusterStatus::Failed));
    let before = h.runner.calls().len();

    let join = h.native(&[], &["1.2.3.7"]);
    let err = h
        .orchestrator
        .join_nodes(&join, &NodeRegistry::new(), "demo")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::NotRunning { status: ClusterStatus::Failed, .. }
    ));
    assert_eq!(h.runner.calls().len(), before);
    assert_eq!(h.status("demo", "native"), Some(ClusterStatus::Failed));
}

#[tokio::test]
async fn test_create_ha_masters_join_bootstrap_master() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1", "1.2.3.2", "1.2.3.3"], &["1.2.3.5"]);

    let state = h
        .orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();

    assert_eq!(state.cluster.status.master_nodes.len(), 3);
    assert_eq!(
        h.touched(),
        vec!["1.2.3.1", "1.2.3.2", "1.2.3.3", "1.2.3.5", "1.2.3.1"]
    );

    let bootstrap = &h.runner.commands_for("1.2.3.1")[0];
    assert!(bootstrap.contains("server --cluster-init"));
    assert!(!bootstrap.contains("--server="));

    for master in ["1.2.3.2", "1.2.3.3"] {
        let install = &h.runner.commands_for(master)[0];
        assert!(install.contains("INSTALL_K3S_EXEC='server "));
        assert!(install.contains("--server=https://1.2.3.1:6443"));
        assert!(!install.contains("--cluster-init"));
        assert!(!install.contains("K3S_URL"));
        for san in ["1.2.3.1", "1.2.3.2", "1.2.3.3", "2.3.4.5"] {
            assert!(install.contains(&format!("--tls-san={}", san)));
        }
    }

    let worker = &h.runner.commands_for("1.2.3.5")[0];
    assert!(worker.contains("K3S_URL='https://1.2.3.1:6443'"));
}

#[tokio::test]
async fn test_join_master_without_ha_is_rejected() {
    let h = Harness::new();
    let mut cluster = fixture_cluster();
    cluster.metadata.cluster = false;
    let create = h.native(&["1.2.3.1"], &[]);
    h.orchestrator
        .init_cluster(&create, &NodeRegistry::new(), cluster)
        .await
        .unwrap();
    let before = h.runner.calls().len();

    let join = h.native(&["1.2.3.2"], &[]);
    let err = h
        .orchestrator
        .join_nodes(&join, &NodeRegistry::new(), "demo")
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(h.runner.calls().len(), before);
    assert_eq!(h.status("demo", "native"), Some(ClusterStatus::Running));
}

#[tokio::test]
async fn test_join_unknown_cluster() {
    let h = Harness::new();
    let join = h.native(&[], &["1.2.3.7"]);
    let err = h
        .orchestrator
        .join_nodes(&join, &NodeRegistry::new(), "ghost")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound { .. }));
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_join_with_synced_existing_nodes() {
    let h = Harness::new();
    let provider = FanOutProvider::new(2);
    h.orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();
    let before = h.runner.calls().len();

    let state = h
        .orchestrator
        .join_nodes(&provider, &NodeRegistry::new(), "demo")
        .await
        .unwrap();

    let joined: Vec<_> = h.runner.calls()[before..]
        .iter()
        .map(|call| call.instance_id.clone())
        .collect();
    assert_eq!(joined, vec!["i-w-join"]);
    assert_eq!(state.cluster.status.worker_nodes.len(), 3);
    assert!(state.cluster.status.nodes().filter(|n| n.instance_id != "i-w-join").all(|n| !n.current));
}

#[tokio::test]
async fn test_delete_declined_is_noop() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1"], &[]);
    h.orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();
    let calls = h.runner.calls().len();

    let deleted = h
        .orchestrator
        .delete_cluster(&provider, "demo", false, &FixedPrompt(false))
        .await
        .unwrap();

    assert!(!deleted);
    assert_eq!(h.runner.calls().len(), calls);
    assert_eq!(h.status("demo", "native"), Some(ClusterStatus::Running));
    assert_eq!(h.kubeconfig().contexts().await.unwrap(), vec!["demo.native"]);
}

#[tokio::test]
async fn test_delete_removes_everything() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1"], &["1.2.3.5"]);
    h.orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();

    let deleted = h
        .orchestrator
        .delete_cluster(&provider, "demo", false, &FixedPrompt(true))
        .await
        .unwrap();

    assert!(deleted);
    assert_eq!(h.status("demo", "native"), None);
    assert!(h.kubeconfig().contexts().await.unwrap().is_empty());
    let master = h.runner.commands_for("1.2.3.1");
    assert!(master.last().unwrap().contains("/usr/local/bin/k3s-uninstall.sh"));
    let worker = h.runner.commands_for("1.2.3.5");
    assert!(worker.last().unwrap().contains("/usr/local/bin/k3s-agent-uninstall.sh"));
}

#[tokio::test]
async fn test_force_delete_is_best_effort() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1"], &["1.2.3.5"]);
    h.orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();
    h.runner.fail_on("1.2.3.1", "host unreachable");

    let err = h
        .orchestrator
        .delete_cluster(&provider, "demo", false, &FixedPrompt(true))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Provider { .. }));
    assert_eq!(h.status("demo", "native"), Some(ClusterStatus::Running));

    let deleted = h
        .orchestrator
        .delete_cluster(&provider, "demo", true, &FixedPrompt(false))
        .await
        .unwrap();
    assert!(deleted);
    assert_eq!(h.status("demo", "native"), None);
    assert!(h.kubeconfig().contexts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_unknown_cluster() {
    let h = Harness::new();
    let provider = h.native(&[], &[]);

    let err = h
        .orchestrator
        .delete_cluster(&provider, "ghost", false, &FixedPrompt(true))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound { .. }));

    let deleted = h
        .orchestrator
        .delete_cluster(&provider, "ghost", true, &FixedPrompt(true))
        .await
        .unwrap();
    assert!(deleted);
}

#[tokio::test]
async fn test_refresh_marks_missing() {
    let h = Harness::new();
    let provider = FanOutProvider::new(1);
    h.orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();

    let state = h.orchestrator.refresh_status(&provider, "demo").await.unwrap();
    assert_eq!(state.status, ClusterStatus::Running);

    provider.present.store(false, Ordering::SeqCst);
    let state = h.orchestrator.refresh_status(&provider, "demo").await.unwrap();
    assert_eq!(state.status, ClusterStatus::Missing);
    assert_eq!(h.status("demo", "fanout"), Some(ClusterStatus::Missing));

    let err = h
        .orchestrator
        .join_nodes(&provider, &NodeRegistry::new(), "demo")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound { .. }));
}

#[tokio::test]
async fn test_open_terminal_on_node() {
    let h = Harness::new();
    let provider = h.native(&["1.2.3.1"], &["1.2.3.5"]);
    h.orchestrator
        .init_cluster(&provider, &NodeRegistry::new(), fixture_cluster())
        .await
        .unwrap();

    let terminal = h
        .orchestrator
        .open_terminal(&provider, "demo", "1.2.3.5")
        .await;
    assert!(terminal.is_ok());
    assert_eq!(h.runner.shells(), vec!["1.2.3.5"]);

    let err = h
        .orchestrator
        .open_terminal(&provider, "demo", "9.9.9.9")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, OrchestratorError::NodeNotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_share_kubeconfig() {
    let h = Harness::new();
    let a = h.native(&["1.2.3.1"], &[]);
    let b = h.native(&["1.2.4.1"], &[]);
    let mut second = fixture_cluster();
    second.metadata.name = "other".to_string();

    let registry_a = NodeRegistry::new();
    let registry_b = NodeRegistry::new();

    let (ra, rb) = tokio::join!(
        h.orchestrator.init_cluster(&a, &registry_a, fixture_cluster()),
        h.orchestrator.init_cluster(&b, &registry_b, second),
    );
    ra.unwrap();
    rb.unwrap();

    let mut contexts = h.kubeconfig().contexts().await.unwrap();
    contexts.sort();
    assert_eq!(contexts, vec!["demo.native", "other.native"]);
    assert_eq!(h.orchestrator.list_clusters().unwrap().len(), 2);
}
