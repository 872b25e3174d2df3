//! Node identity, addresses and credentials.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default SSH user when none is configured.
const DEFAULT_SSH_USER: &str = "root";

/// Default SSH port when none is configured.
const DEFAULT_SSH_PORT: u16 = 22;

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Control-plane node running the K3s server.
    Master,
    /// Agent node joined to a master.
    Worker,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SSH credentials, either cluster defaults or per-node overrides.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredentials {
    /// Login user (`root` when empty).
    #[serde(default)]
    pub user: String,

    /// SSH port (22 when zero).
    #[serde(default)]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Inline private key (PEM/OpenSSH).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Path to a private key file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,

    /// Inline certificate signing the private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,

    /// Path to a certificate signing the private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,

    /// Fall back to the local SSH agent.
    #[serde(default)]
    pub agent_auth: bool,
}

impl SshCredentials {
    /// Effective login user.
    pub fn user(&self) -> &str {
        if self.user.is_empty() {
            DEFAULT_SSH_USER
        } else {
            &self.user
        }
    }

    /// Effective port.
    pub fn port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.port
        }
    }

    /// Fill every unset field from `defaults`. Fields set here win.
    pub fn with_defaults(&self, defaults: &SshCredentials) -> SshCredentials {
        SshCredentials {
            user: if self.user.is_empty() {
                defaults.user.clone()
            } else {
                self.user.clone()
            },
            port: if self.port == 0 { defaults.port } else { self.port },
            password: self.password.clone().or_else(|| defaults.password.clone()),
            key: self.key.clone().or_else(|| defaults.key.clone()),
            key_path: self.key_path.clone().or_else(|| defaults.key_path.clone()),
            key_passphrase: self
                .key_passphrase
                .clone()
                .or_else(|| defaults.key_passphrase.clone()),
            cert: self.cert.clone().or_else(|| defaults.cert.clone()),
            cert_path: self.cert_path.clone().or_else(|| defaults.cert_path.clone()),
            agent_auth: self.agent_auth || defaults.agent_auth,
        }
    }
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secrets stay out of logs.
        f.debug_struct("SshCredentials")
            .field("user", &self.user())
            .field("port", &self.port())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .field(
                "key_passphrase",
                &self.key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("cert", &self.cert.as_ref().map(|_| "<redacted>"))
            .field("cert_path", &self.cert_path)
            .field("agent_auth", &self.agent_auth)
            .finish()
    }
}

/// A backend instance taking part in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Backend instance identifier, stable for the node's lifetime.
    pub instance_id: String,

    /// Control-plane node.
    #[serde(default)]
    pub master: bool,

    #[serde(default)]
    pub internal_ip_address: Vec<String>,

    #[serde(default)]
    pub public_ip_address: Vec<String>,

    /// Touched by the current invocation.
    #[serde(default)]
    pub current: bool,

    /// Eligible for compensating deletion if the invocation fails.
    #[serde(default)]
    pub rollback: bool,

    /// Free-text backend status (e.g. `pending`, `running`).
    #[serde(default)]
    pub instance_status: String,

    /// Per-node credentials; unset fields fall back to the cluster defaults.
    #[serde(default)]
    pub ssh: SshCredentials,
}

impl Node {
    /// Create a node with only identity and role set.
    pub fn new(instance_id: impl Into<String>, master: bool) -> Self {
        Self {
            instance_id: instance_id.into(),
            master,
            ..Default::default()
        }
    }

    /// Role derived from the `master` flag.
    pub fn role(&self) -> NodeRole {
        if self.master {
            NodeRole::Master
        } else {
            NodeRole::Worker
        }
    }

    /// First non-empty public address.
    pub fn first_public_ip(&self) -> Option<&str> {
        first_non_empty(&self.public_ip_address)
    }

    /// First non-empty internal address.
    pub fn first_internal_ip(&self) -> Option<&str> {
        first_non_empty(&self.internal_ip_address)
    }

    /// Address used to reach the node: public first, then internal.
    pub fn address(&self) -> Option<&str> {
        self.first_public_ip().or_else(|| self.first_internal_ip())
    }
}

fn first_non_empty(addrs: &[String]) -> Option<&str> {
    addrs
        .iter()
        .map(|a| a.trim())
        .find(|a| !a.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_prefers_public() {
        let mut node = Node::new("i-1", true);
        node.internal_ip_address = vec!["10.0.0.1".to_string()];
        assert_eq!(node.address(), Some("10.0.0.1"));

        node.public_ip_address = vec!["".to_string(), "1.2.3.4".to_string()];
        assert_eq!(node.first_public_ip(), Some("1.2.3.4"));
        assert_eq!(node.address(), Some("1.2.3.4"));
    }

    #[test]
    fn test_address_empty_lists() {
        let node = Node::new("i-1", false);
        assert_eq!(node.address(), None);
        assert_eq!(node.role(), NodeRole::Worker);
    }

    #[test]
    fn test_credentials_defaults() {
        let creds = SshCredentials::default();
        assert_eq!(creds.user(), "root");
        assert_eq!(creds.port(), 22);
    }

    #[test]
    fn test_credentials_with_defaults() {
        let defaults = SshCredentials {
            user: "ubuntu".to_string(),
            port: 2222,
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let node = SshCredentials {
            key_path: Some(PathBuf::from("/keys/id_rsa")),
            port: 22,
            ..Default::default()
        };

        let merged = node.with_defaults(&defaults);
        assert_eq!(merged.user(), "ubuntu");
        assert_eq!(merged.port(), 22);
        assert_eq!(merged.password.as_deref(), Some("secret"));
        assert_eq!(merged.key_path, Some(PathBuf::from("/keys/id_rsa")));
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = SshCredentials {
            password: Some("hunter2".to_string()),
            key: Some("-----BEGIN KEY-----".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("BEGIN KEY"));
        assert!(debug.contains("<redacted>"));
    }
}
