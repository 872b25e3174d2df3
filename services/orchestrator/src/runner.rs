//! Remote command execution interface and mock implementation.
//!
//! The orchestrator never talks SSH directly: it hands a node (with its
//! effective credentials already merged) and a command batch to a
//! [`CommandRunner`]. [`SshRunner`] is the production implementation;
//! [`MockRunner`] records calls for tests and local development.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use autok3s_ssh::{PtyShell, RetryPolicy, SshClient, SshError, SshTarget, Terminal};
use autok3s_types::Node;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs command batches and opens shells on cluster nodes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `commands` on `node` as one batch and return the combined output.
    async fn run(&self, node: &Node, commands: &[String]) -> Result<String, SshError>;

    /// Open an interactive shell on `node`. The terminal is not started.
    async fn shell(&self, node: &Node) -> Result<Box<dyn Terminal>, SshError>;
}

/// Dials every node over SSH.
///
/// One connection per call: batches are coarse and nodes are installed one
/// at a time, so there is nothing to pool.
#[derive(Debug, Clone)]
pub struct SshRunner {
    policy: RetryPolicy,
    connect_timeout: Duration,
    cancel: CancellationToken,
}

impl SshRunner {
    pub fn new(policy: RetryPolicy, connect_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            policy,
            connect_timeout,
            cancel,
        }
    }

    async fn connect(&self, node: &Node) -> Result<SshClient, SshError> {
        let host = node.address().ok_or_else(|| SshError::NoAddress {
            instance_id: node.instance_id.clone(),
        })?;
        let target = SshTarget::new(host, node.ssh.clone()).with_connect_timeout(self.connect_timeout);
        SshClient::connect(&target, &self.policy, &self.cancel).await
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(&self, node: &Node, commands: &[String]) -> Result<String, SshError> {
        let client = self.connect(node).await?;
        debug!(instance_id = %node.instance_id, commands = commands.len(), "Running command batch");
        client.run(commands).await
    }

    async fn shell(&self, node: &Node) -> Result<Box<dyn Terminal>, SshError> {
        let client = self.connect(node).await?;
        Ok(Box::new(client.into_shell()))
    }
}

/// A command batch seen by [`MockRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCall {
    pub instance_id: String,
    pub commands: Vec<String>,
}

/// Kubeconfig a fresh k3s server writes.
pub const SAMPLE_K3S_KUBECONFIG: &str = r#"apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: Q0E=
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
kind: Config
preferences: {}
users:
- name: default
  user:
    client-certificate-data: Q0VSVA==
    client-key-data: S0VZ
"#;

/// Mock runner for testing and development.
///
/// Records every batch, fails batches on chosen nodes and answers batches
/// whose command starts with a registered prefix with canned output.
pub struct MockRunner {
    calls: Mutex<Vec<RunCall>>,
    shells: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, String)>>,
    responses: Mutex<Vec<(String, String)>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockRunner {
    /// A runner that succeeds everywhere and serves a sample kubeconfig.
    pub fn new() -> Self {
        let runner = Self {
            calls: Mutex::new(Vec::new()),
            shells: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
        };
        runner.respond(
            format!("cat {}", autok3s_install::K3S_KUBECONFIG_PATH),
            SAMPLE_K3S_KUBECONFIG,
        );
        runner
    }

    /// Fail every batch sent to `instance_id` with `output`.
    pub fn fail_on(&self, instance_id: impl Into<String>, output: impl Into<String>) {
        guard(&self.failures).push((instance_id.into(), output.into()));
    }

    /// Answer batches containing a command starting with `prefix`.
    /// Later registrations win.
    pub fn respond(&self, prefix: impl Into<String>, output: impl Into<String>) {
        guard(&self.responses).insert(0, (prefix.into(), output.into()));
    }

    pub fn calls(&self) -> Vec<RunCall> {
        guard(&self.calls).clone()
    }

    /// Every command sent to `instance_id`, flattened in order.
    pub fn commands_for(&self, instance_id: &str) -> Vec<String> {
        guard(&self.calls)
            .iter()
            .filter(|call| call.instance_id == instance_id)
            .flat_map(|call| call.commands.iter().cloned())
            .collect()
    }

    /// Instance ids a shell was opened on.
    pub fn shells(&self) -> Vec<String> {
        guard(&self.shells).clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, node: &Node, commands: &[String]) -> Result<String, SshError> {
        info!(instance_id = %node.instance_id, commands = commands.len(), "[MOCK] Running command batch");
        guard(&self.calls).push(RunCall {
            instance_id: node.instance_id.clone(),
            commands: commands.to_vec(),
        });

        let host = node.address().unwrap_or(&node.instance_id).to_string();
        if let Some((_, output)) = guard(&self.failures)
            .iter()
            .find(|(id, _)| *id == node.instance_id)
        {
            return Err(SshError::CommandFailed {
                host,
                status: 1,
                output: output.clone(),
            });
        }

        let responses = guard(&self.responses);
        let output = responses
            .iter()
            .find(|(prefix, _)| commands.iter().any(|c| c.starts_with(prefix.as_str())))
            .map(|(_, output)| output.clone())
            .unwrap_or_default();
        Ok(output)
    }

    async fn shell(&self, node: &Node) -> Result<Box<dyn Terminal>, SshError> {
        debug!(instance_id = %node.instance_id, "[MOCK] Opening shell");
        guard(&self.shells).push(node.instance_id.clone());
        Ok(Box::new(PtyShell::new("cat", Vec::<String>::new())))
    }
}
