//! Cluster topology and ordered node lists.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::node::{Node, SshCredentials};

/// Upstream K3s install script.
pub const DEFAULT_INSTALL_SCRIPT: &str = "https://get.k3s.io";

fn default_install_script() -> String {
    DEFAULT_INSTALL_SCRIPT.to_string()
}

fn default_master_count() -> u32 {
    1
}

/// Declarative cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,

    pub provider: String,

    /// Desired number of masters.
    #[serde(default = "default_master_count")]
    pub master: u32,

    /// Desired number of workers.
    #[serde(default)]
    pub worker: u32,

    /// Exact K3s release; wins over `k3s_channel`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k3s_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k3s_channel: Option<String>,

    #[serde(default = "default_install_script")]
    pub install_script: String,

    /// Extra installer environment as `KEY=VALUE` (e.g. `INSTALL_K3S_MIRROR=cn`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<String>,

    /// Shared cluster secret; generated on create when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default)]
    pub tls_sans: Vec<String>,

    /// HA with embedded etcd.
    #[serde(default)]
    pub cluster: bool,

    /// External datastore endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore_ca_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore_cert_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore_key_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore_ca_file_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore_cert_file_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore_key_file_content: Option<String>,

    /// Flannel backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_cidr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_default_registry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_extra_args: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_extra_args: Option<String>,

    /// `registries.yaml` content distributed to every node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_content: Option<String>,

    /// Local manifest file or directory deployed on the bootstrap master.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifests: Option<PathBuf>,

    /// Airgap package name; set by the package subsystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_path: Option<String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider: String::new(),
            master: default_master_count(),
            worker: 0,
            k3s_version: None,
            k3s_channel: None,
            install_script: default_install_script(),
            mirror: None,
            token: None,
            tls_sans: Vec::new(),
            cluster: false,
            datastore: None,
            datastore_ca_file: None,
            datastore_cert_file: None,
            datastore_key_file: None,
            datastore_ca_file_content: None,
            datastore_cert_file_content: None,
            datastore_key_file_content: None,
            network: None,
            cluster_cidr: None,
            system_default_registry: None,
            master_extra_args: None,
            worker_extra_args: None,
            registry_content: None,
            manifests: None,
            package_name: None,
            package_path: None,
        }
    }
}

/// Treat `Some("")` like `None`.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Metadata {
    pub fn token(&self) -> Option<&str> {
        present(&self.token)
    }

    pub fn k3s_version(&self) -> Option<&str> {
        present(&self.k3s_version)
    }

    pub fn k3s_channel(&self) -> Option<&str> {
        present(&self.k3s_channel)
    }

    pub fn mirror(&self) -> Option<&str> {
        present(&self.mirror)
    }

    pub fn datastore(&self) -> Option<&str> {
        present(&self.datastore)
    }

    pub fn network(&self) -> Option<&str> {
        present(&self.network)
    }

    pub fn cluster_cidr(&self) -> Option<&str> {
        present(&self.cluster_cidr)
    }

    pub fn system_default_registry(&self) -> Option<&str> {
        present(&self.system_default_registry)
    }

    pub fn master_extra_args(&self) -> Option<&str> {
        present(&self.master_extra_args)
    }

    pub fn worker_extra_args(&self) -> Option<&str> {
        present(&self.worker_extra_args)
    }

    pub fn registry_content(&self) -> Option<&str> {
        present(&self.registry_content)
    }

    pub fn datastore_ca_file(&self) -> Option<&str> {
        present(&self.datastore_ca_file)
    }

    pub fn datastore_cert_file(&self) -> Option<&str> {
        present(&self.datastore_cert_file)
    }

    pub fn datastore_key_file(&self) -> Option<&str> {
        present(&self.datastore_key_file)
    }

    pub fn datastore_ca_file_content(&self) -> Option<&str> {
        present(&self.datastore_ca_file_content)
    }

    pub fn datastore_cert_file_content(&self) -> Option<&str> {
        present(&self.datastore_cert_file_content)
    }

    pub fn datastore_key_file_content(&self) -> Option<&str> {
        present(&self.datastore_key_file_content)
    }

    /// Air-gapped installs use a pre-staged package instead of the script.
    pub fn is_airgap(&self) -> bool {
        present(&self.package_name).is_some() || present(&self.package_path).is_some()
    }

    /// Reject topologies that cannot be bootstrapped.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        if self.provider.trim().is_empty() {
            return Err(ValidationError::EmptyProvider);
        }
        if self.master < 1 {
            return Err(ValidationError::NoMaster(self.master));
        }
        self.validate_datastore()?;
        if self.master > 1 && !self.cluster && self.datastore().is_none() {
            return Err(ValidationError::HaWithoutDatastore {
                masters: self.master,
            });
        }
        if let Some(mirror) = self.mirror() {
            match mirror.split_once('=') {
                Some((key, _)) if !key.trim().is_empty() => {}
                _ => return Err(ValidationError::InvalidMirror(mirror.to_string())),
            }
        }
        Ok(())
    }

    /// Validate adding `added_masters` masters to an existing cluster.
    pub fn validate_join(&self, added_masters: u32) -> Result<(), ValidationError> {
        self.validate_datastore()?;
        if added_masters > 0 && !self.cluster && self.datastore().is_none() {
            return Err(ValidationError::HaWithoutDatastore {
                masters: self.master + added_masters,
            });
        }
        Ok(())
    }

    fn validate_datastore(&self) -> Result<(), ValidationError> {
        if self.cluster && self.datastore().is_some() {
            return Err(ValidationError::DatastoreConflict);
        }

        let tls = [
            ("CA file", self.datastore_ca_file(), self.datastore_ca_file_content()),
            (
                "cert file",
                self.datastore_cert_file(),
                self.datastore_cert_file_content(),
            ),
            ("key file", self.datastore_key_file(), self.datastore_key_file_content()),
        ];
        for (what, path, content) in tls {
            if path.is_some() && content.is_some() {
                return Err(ValidationError::DatastoreTlsAmbiguous(what));
            }
            if (path.is_some() || content.is_some()) && self.datastore().is_none() {
                return Err(ValidationError::DatastoreTlsWithoutEndpoint(what));
            }
        }
        Ok(())
    }
}

/// Cluster names end up in file names and kubeconfig context names.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let mut chars = name.chars();
    let starts_alnum = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_alnum || !chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Ordered node lists. Insertion order is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub master_nodes: Vec<Node>,

    #[serde(default)]
    pub worker_nodes: Vec<Node>,
}

impl Status {
    /// Masters followed by workers.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.master_nodes.iter().chain(self.worker_nodes.iter())
    }

    pub fn find(&self, instance_id: &str) -> Option<&Node> {
        self.nodes().find(|n| n.instance_id == instance_id)
    }

    pub fn find_mut(&mut self, instance_id: &str) -> Option<&mut Node> {
        self.master_nodes
            .iter_mut()
            .chain(self.worker_nodes.iter_mut())
            .find(|n| n.instance_id == instance_id)
    }

    pub fn len(&self) -> usize {
        self.master_nodes.len() + self.worker_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.master_nodes.is_empty() && self.worker_nodes.is_empty()
    }
}

/// A cluster: configuration, ordered nodes, default credentials and
/// provider-specific options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: Metadata,

    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    pub ssh: SshCredentials,

    /// Opaque provider options.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl Cluster {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            ..Default::default()
        }
    }

    /// The bootstrap master.
    pub fn first_master(&self) -> Option<&Node> {
        self.status.master_nodes.first()
    }

    /// Address every joining node uses to reach the control plane.
    pub fn fixed_ip(&self) -> Option<&str> {
        self.first_master().and_then(Node::address)
    }

    /// Effective credentials for `node`.
    pub fn credentials_for(&self, node: &Node) -> SshCredentials {
        node.ssh.with_defaults(&self.ssh)
    }
}
