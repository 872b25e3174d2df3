//! Cluster files and command-line cluster flags.
//!
//! A cluster file is TOML:
//!
//! ```toml
//! [metadata]
//! name = "demo"
//! k3s_version = "v1.24.3+k3s1"
//! cluster = true
//!
//! [ssh]
//! user = "ubuntu"
//! key_path = "~/.ssh/id_ed25519"
//!
//! [native]
//! master_ips = ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
//! worker_ips = ["10.0.0.10"]
//! ```
//!
//! Flags given on the command line override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use autok3s_orchestrator::NativeOptions;
use autok3s_types::{Cluster, Metadata, SshCredentials};
use clap::Args;
use serde::Deserialize;

use crate::error::CliError;

/// Parsed cluster file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterFile {
    pub metadata: Metadata,

    #[serde(default)]
    pub ssh: SshCredentials,

    #[serde(default)]
    pub native: NativeOptions,
}

impl ClusterFile {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CliError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| CliError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let mut doc: toml::Table = toml::from_str(contents)?;

        let metadata = doc
            .entry("metadata")
            .or_insert(toml::Value::Table(toml::Table::new()));
        if let toml::Value::Table(metadata) = metadata {
            metadata
                .entry("name")
                .or_insert(toml::Value::String(String::new()));
            metadata
                .entry("provider")
                .or_insert(toml::Value::String("native".to_string()));
        }

        toml::Value::Table(doc).try_into()
    }

    /// Cluster definition plus the hosts to install.
    pub fn into_parts(self) -> (Cluster, NativeOptions) {
        let mut cluster = Cluster::new(self.metadata);
        cluster.ssh = self.ssh;
        (cluster, self.native)
    }
}

/// Hosts to add to a cluster.
#[derive(Debug, Clone, Default, Args)]
pub struct HostFlags {
    /// Master host addresses (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub master_ips: Vec<String>,

    /// Worker host addresses (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub worker_ips: Vec<String>,
}

impl HostFlags {
    pub fn is_empty(&self) -> bool {
        self.master_ips.iter().chain(&self.worker_ips).all(|ip| ip.trim().is_empty())
    }

    pub fn into_options(self) -> NativeOptions {
        NativeOptions {
            master_ips: self.master_ips,
            worker_ips: self.worker_ips,
        }
    }
}

/// SSH login flags. Unset flags leave the file's values alone.
#[derive(Debug, Clone, Default, Args)]
pub struct SshFlags {
    /// SSH user.
    #[arg(long)]
    pub ssh_user: Option<String>,

    /// SSH port.
    #[arg(long)]
    pub ssh_port: Option<u16>,

    /// SSH password.
    #[arg(long, env = "AUTOK3S_SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    /// Private key file.
    #[arg(long)]
    pub ssh_key_path: Option<PathBuf>,

    /// Passphrase of the private key.
    #[arg(long, env = "AUTOK3S_SSH_KEY_PASSPHRASE", hide_env_values = true)]
    pub ssh_key_passphrase: Option<String>,

    /// Certificate signing the private key.
    #[arg(long)]
    pub ssh_cert_path: Option<PathBuf>,

    /// Use the local SSH agent.
    #[arg(long)]
    pub ssh_agent: bool,
}

impl SshFlags {
    pub fn apply(self, ssh: &mut SshCredentials) {
        if let Some(user) = self.ssh_user {
            ssh.user = user;
        }
        if let Some(port) = self.ssh_port {
            ssh.port = port;
        }
        set(&mut ssh.password, self.ssh_password);
        set(&mut ssh.key_path, self.ssh_key_path);
        set(&mut ssh.key_passphrase, self.ssh_key_passphrase);
        set(&mut ssh.cert_path, self.ssh_cert_path);
        ssh.agent_auth |= self.ssh_agent;
    }
}

/// Cluster definition flags.
#[derive(Debug, Clone, Default, Args)]
pub struct ClusterFlags {
    /// Cluster name; generated when omitted.
    #[arg(long, short = 'n')]
    pub name: Option<String>,

    #[command(flatten)]
    pub hosts: HostFlags,

    #[command(flatten)]
    pub ssh: SshFlags,

    /// K3s release, e.g. v1.24.3+k3s1.
    #[arg(long)]
    pub k3s_version: Option<String>,

    /// K3s release channel (stable, latest, ...).
    #[arg(long)]
    pub k3s_channel: Option<String>,

    /// Install script URL.
    #[arg(long)]
    pub install_script: Option<String>,

    /// Installer mirror as KEY=VALUE, e.g. INSTALL_K3S_MIRROR=cn.
    #[arg(long)]
    pub mirror: Option<String>,

    /// Cluster token; generated when omitted.
    #[arg(long, env = "AUTOK3S_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// HA with embedded etcd.
    #[arg(long)]
    pub cluster: bool,

    /// External datastore endpoint.
    #[arg(long)]
    pub datastore: Option<String>,

    #[arg(long)]
    pub datastore_ca_file: Option<String>,

    #[arg(long)]
    pub datastore_cert_file: Option<String>,

    #[arg(long)]
    pub datastore_key_file: Option<String>,

    /// Extra SANs for the API server certificate (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub tls_sans: Vec<String>,

    /// Flannel backend.
    #[arg(long)]
    pub network: Option<String>,

    #[arg(long)]
    pub cluster_cidr: Option<String>,

    #[arg(long)]
    pub system_default_registry: Option<String>,

    /// Extra arguments for k3s server.
    #[arg(long, allow_hyphen_values = true)]
    pub master_extra_args: Option<String>,

    /// Extra arguments for k3s agent.
    #[arg(long, allow_hyphen_values = true)]
    pub worker_extra_args: Option<String>,

    /// registries.yaml to install on every node.
    #[arg(long)]
    pub registry: Option<PathBuf>,

    /// Manifest file or directory applied after create.
    #[arg(long)]
    pub manifests: Option<PathBuf>,
}

impl ClusterFlags {
    /// Override `file` with every flag that was given.
    pub fn apply(self, file: &mut ClusterFile) -> Result<()> {
        let metadata = &mut file.metadata;
        if let Some(name) = self.name {
            metadata.name = name;
        }
        if let Some(script) = self.install_script {
            metadata.install_script = script;
        }
        set(&mut metadata.k3s_version, self.k3s_version);
        set(&mut metadata.k3s_channel, self.k3s_channel);
        set(&mut metadata.mirror, self.mirror);
        set(&mut metadata.token, self.token);
        set(&mut metadata.datastore, self.datastore);
        set(&mut metadata.datastore_ca_file, self.datastore_ca_file);
        set(&mut metadata.datastore_cert_file, self.datastore_cert_file);
        set(&mut metadata.datastore_key_file, self.datastore_key_file);
        set(&mut metadata.network, self.network);
        set(&mut metadata.cluster_cidr, self.cluster_cidr);
        set(&mut metadata.system_default_registry, self.system_default_registry);
        set(&mut metadata.master_extra_args, self.master_extra_args);
        set(&mut metadata.worker_extra_args, self.worker_extra_args);
        set(&mut metadata.manifests, self.manifests);
        metadata.cluster |= self.cluster;
        if !self.tls_sans.is_empty() {
            metadata.tls_sans = self.tls_sans;
        }
        if let Some(path) = self.registry {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read registry file {}", path.display()))?;
            metadata.registry_content = Some(content);
        }

        if !self.hosts.master_ips.is_empty() {
            file.native.master_ips = self.hosts.master_ips;
        }
        if !self.hosts.worker_ips.is_empty() {
            file.native.worker_ips = self.hosts.worker_ips;
        }

        self.ssh.apply(&mut file.ssh);
        Ok(())
    }
}

fn set<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}
