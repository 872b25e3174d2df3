//! # autok3s-install
//!
//! Synthesizes the shell commands that bootstrap K3s on a node.
//!
//! ## Guarantees
//!
//! - Output is a pure function of its inputs: the same cluster, node and role
//!   context always produce a byte-identical command, so re-runs can be diffed
//! - Run args and environment variables are sorted; the `server` keyword is
//!   prepended to master args after sorting
//! - An external datastore suppresses the embedded-etcd HA flags
//!
//! ## Example
//!
//! ```text
//! curl -sLS https://get.k3s.io | INSTALL_K3S_EXEC='server --cluster-init ...' \
//!     INSTALL_K3S_VERSION='v1.24.3+k3s1' K3S_TOKEN='...' sh -
//! ```

mod command;
mod files;

pub use command::{build, quote, run_args, tls_sans, AIRGAP_INSTALLER, SUPERVISOR_PORT};
pub use files::{
    manifest_commands, node_prepare_commands, uninstall_command, write_file_command,
    DATASTORE_CA_PATH, DATASTORE_CERT_PATH, DATASTORE_KEY_PATH, K3S_KUBECONFIG_PATH,
    MANIFESTS_DIR, REGISTRIES_PATH,
};
