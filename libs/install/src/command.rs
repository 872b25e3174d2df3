//! Install command assembly.

use std::collections::BTreeSet;

use autok3s_types::{Cluster, Node};

use crate::files::{DATASTORE_CA_PATH, DATASTORE_CERT_PATH, DATASTORE_KEY_PATH};

/// Port the K3s supervisor (and API server) listens on.
pub const SUPERVISOR_PORT: u16 = 6443;

/// Installer executed for air-gapped installs. The package subsystem stages
/// it on the node's `PATH`.
pub const AIRGAP_INSTALLER: &str = "install.sh";

/// Build the install command for `node`.
///
/// `fixed_ip` is the bootstrap master's address; it is used by workers
/// (`K3S_URL`) and by joining masters in HA mode (`--server`).
/// `extra_args` is appended after the generated run args in the order given.
pub fn build(
    cluster: &Cluster,
    node: &Node,
    is_first_master: bool,
    fixed_ip: &str,
    extra_args: &str,
) -> String {
    let meta = &cluster.metadata;
    let mut envs: Vec<(String, String)> = Vec::new();

    let (prefix, suffix) = if meta.is_airgap() {
        envs.push(("INSTALL_K3S_SKIP_DOWNLOAD".to_string(), "true".to_string()));
        (String::new(), AIRGAP_INSTALLER.to_string())
    } else {
        if let Some(version) = meta.k3s_version() {
            envs.push(("INSTALL_K3S_VERSION".to_string(), version.to_string()));
        } else if let Some(channel) = meta.k3s_channel() {
            envs.push(("INSTALL_K3S_CHANNEL".to_string(), channel.to_string()));
        }
        (
            format!("curl -sLS {} |", meta.install_script.trim()),
            "sh -".to_string(),
        )
    };

    if let Some((key, value)) = meta.mirror().and_then(|m| m.split_once('=')) {
        envs.push((key.trim().to_string(), value.to_string()));
    }

    envs.push((
        "K3S_TOKEN".to_string(),
        meta.token().unwrap_or_default().to_string(),
    ));
    if !node.master {
        envs.push((
            "K3S_URL".to_string(),
            format!("https://{}:{}", fixed_ip, SUPERVISOR_PORT),
        ));
    }

    let exec = run_args(cluster, node, is_first_master, fixed_ip, extra_args);
    if !exec.is_empty() {
        envs.push(("INSTALL_K3S_EXEC".to_string(), exec));
    }

    let mut rendered: Vec<String> = envs
        .iter()
        .map(|(key, value)| format!("{}={}", key, quote(value)))
        .collect();
    rendered.sort();
    let envs = rendered.join(" ");

    [prefix.trim(), envs.as_str(), suffix.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Role-aware K3s run args: `server` for masters, the generated flags
/// sorted, then `extra_args` verbatim so `--flag value` pairs stay together.
pub fn run_args(
    cluster: &Cluster,
    node: &Node,
    is_first_master: bool,
    fixed_ip: &str,
    extra_args: &str,
) -> String {
    let meta = &cluster.metadata;
    let mut args: Vec<String> = Vec::new();

    if node.master {
        if let Some(datastore) = meta.datastore() {
            args.push(format!("--datastore-endpoint={}", datastore));
            if let Some(path) = datastore_file(
                meta.datastore_ca_file_content(),
                meta.datastore_ca_file(),
                DATASTORE_CA_PATH,
            ) {
                args.push(format!("--datastore-cafile={}", path));
            }
            if let Some(path) = datastore_file(
                meta.datastore_cert_file_content(),
                meta.datastore_cert_file(),
                DATASTORE_CERT_PATH,
            ) {
                args.push(format!("--datastore-certfile={}", path));
            }
            if let Some(path) = datastore_file(
                meta.datastore_key_file_content(),
                meta.datastore_key_file(),
                DATASTORE_KEY_PATH,
            ) {
                args.push(format!("--datastore-keyfile={}", path));
            }
        } else if meta.cluster {
            if is_first_master {
                args.push("--cluster-init".to_string());
            } else {
                args.push(format!("--server=https://{}:{}", fixed_ip, SUPERVISOR_PORT));
            }
        }

        if let Some(cidr) = meta.cluster_cidr() {
            args.push(format!("--cluster-cidr={}", cidr));
        }
        for san in tls_sans(cluster) {
            args.push(format!("--tls-san={}", san));
        }
        if let Some(ip) = node.first_internal_ip() {
            args.push(format!("--advertise-address={}", ip));
        }
    }

    if let Some(ip) = node.first_public_ip() {
        args.push(format!("--node-external-ip={}", ip));
    }
    if let Some(network) = meta.network() {
        args.push(format!("--flannel-backend={}", network));
    }
    if let Some(registry) = meta.system_default_registry() {
        args.push(format!("--system-default-registry={}", registry));
    }

    args.sort();

    if node.master {
        args.insert(0, "server".to_string());
    }
    args.extend(extra_args.split_whitespace().map(str::to_string));
    args.join(" ")
}

/// Deduplicated, sorted union of configured SANs and every master's first
/// public and first internal address.
pub fn tls_sans(cluster: &Cluster) -> BTreeSet<String> {
    let configured = cluster
        .metadata
        .tls_sans
        .iter()
        .map(|san| san.trim())
        .filter(|san| !san.is_empty());

    let masters = cluster
        .status
        .master_nodes
        .iter()
        .flat_map(|m| [m.first_public_ip(), m.first_internal_ip()])
        .flatten();

    configured.chain(masters).map(str::to_string).collect()
}

/// Inline content is written to `well_known`; otherwise the configured path.
fn datastore_file<'a>(
    content: Option<&str>,
    path: Option<&'a str>,
    well_known: &'a str,
) -> Option<&'a str> {
    if content.is_some() {
        Some(well_known)
    } else {
        path
    }
}

/// Single-quote `value` for POSIX shells.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
