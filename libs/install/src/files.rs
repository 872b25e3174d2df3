//! Node-side file staging and teardown commands.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use autok3s_types::{Cluster, Node, NodeRole};

use crate::command::quote;

/// Admin kubeconfig written by the K3s server.
pub const K3S_KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

/// Auto-deploy manifests directory on masters.
pub const MANIFESTS_DIR: &str = "/var/lib/rancher/k3s/server/manifests";

/// Private registry configuration.
pub const REGISTRIES_PATH: &str = "/etc/rancher/k3s/registries.yaml";

pub const DATASTORE_CA_PATH: &str = "/etc/rancher/k3s/datastore/ca.pem";
pub const DATASTORE_CERT_PATH: &str = "/etc/rancher/k3s/datastore/cert.pem";
pub const DATASTORE_KEY_PATH: &str = "/etc/rancher/k3s/datastore/key.pem";

/// Write `content` to `path`, creating the parent directory.
///
/// Content travels base64 encoded; both paths are shell quoted.
pub fn write_file_command(path: &str, content: &str) -> String {
    let encoded = STANDARD.encode(content.as_bytes());
    let parent = match path.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir,
        _ => "/",
    };
    format!(
        "mkdir -p {} && echo '{}' | base64 -d > {}",
        quote(parent),
        encoded,
        quote(path)
    )
}

/// Files a node needs before the installer runs: registry configuration
/// everywhere and inline datastore TLS material on masters.
pub fn node_prepare_commands(cluster: &Cluster, node: &Node) -> Vec<String> {
    let meta = &cluster.metadata;
    let mut cmds = Vec::new();

    if let Some(registry) = meta.registry_content() {
        cmds.push(write_file_command(REGISTRIES_PATH, registry));
    }

    if node.master && meta.datastore().is_some() {
        let inline = [
            (meta.datastore_ca_file_content(), DATASTORE_CA_PATH),
            (meta.datastore_cert_file_content(), DATASTORE_CERT_PATH),
            (meta.datastore_key_file_content(), DATASTORE_KEY_PATH),
        ];
        for (content, path) in inline.into_iter().filter_map(|(c, p)| c.map(|c| (c, p))) {
            cmds.push(write_file_command(path, content));
        }
    }
    cmds
}

/// Stage `(file name, content)` manifests into the auto-deploy directory.
pub fn manifest_commands<'a, I>(manifests: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    manifests
        .into_iter()
        .map(|(name, content)| write_file_command(&format!("{}/{}", MANIFESTS_DIR, name), content))
        .collect()
}

/// Run the uninstall script the installer left for `role`, if present.
pub fn uninstall_command(role: NodeRole) -> String {
    let script = match role {
        NodeRole::Master => "/usr/local/bin/k3s-uninstall.sh",
        NodeRole::Worker => "/usr/local/bin/k3s-agent-uninstall.sh",
    };
    format!("if [ -x {0} ]; then {0}; fi", script)
}
