//! Authentication method selection.

use std::fs;
use std::path::{Path, PathBuf};

use autok3s_types::SshCredentials;
use ssh2::Session;
use tracing::debug;

use crate::error::SshError;

/// Key or certificate, inline or on disk.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    Inline(String),
    File(PathBuf),
}

impl KeyMaterial {
    fn from_parts(inline: Option<&String>, path: Option<&PathBuf>) -> Option<Self> {
        match (inline.filter(|s| !s.trim().is_empty()), path) {
            (Some(content), _) => Some(Self::Inline(content.clone())),
            (None, Some(path)) if !path.as_os_str().is_empty() => Some(Self::File(path.clone())),
            _ => None,
        }
    }

    fn read(&self) -> Result<String, SshError> {
        match self {
            Self::Inline(content) => Ok(content.clone()),
            Self::File(path) => fs::read_to_string(path).map_err(|source| SshError::KeyFile {
                path: path.clone(),
                source,
            }),
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Inline(_) => None,
        }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline(<redacted>)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// One way of proving identity to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    PrivateKey {
        key: KeyMaterial,
        passphrase: Option<String>,
    },
    /// Private key presented with a CA-signed certificate.
    Certificate {
        key: KeyMaterial,
        cert: KeyMaterial,
        passphrase: Option<String>,
    },
    Password(String),
    Agent,
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PrivateKey { .. } => "private_key",
            Self::Certificate { .. } => "certificate",
            Self::Password(_) => "password",
            Self::Agent => "agent",
        }
    }

    /// Try this method on a handshaken session.
    pub(crate) fn authenticate(&self, session: &Session, user: &str, host: &str) -> Result<(), SshError> {
        let result = match self {
            Self::PrivateKey { key, passphrase } => pubkey(session, user, key, None, passphrase.as_deref(), host),
            Self::Certificate {
                key,
                cert,
                passphrase,
            } => pubkey(session, user, key, Some(cert), passphrase.as_deref(), host),
            Self::Password(password) => session
                .userauth_password(user, password)
                .map_err(|e| SshError::protocol(host, e)),
            Self::Agent => session
                .userauth_agent(user)
                .map_err(|e| SshError::protocol(host, e)),
        };
        result?;

        if session.authenticated() {
            Ok(())
        } else {
            Err(SshError::Auth {
                host: host.to_string(),
                user: user.to_string(),
            })
        }
    }
}

fn pubkey(
    session: &Session,
    user: &str,
    key: &KeyMaterial,
    cert: Option<&KeyMaterial>,
    passphrase: Option<&str>,
    host: &str,
) -> Result<(), SshError> {
    let on_disk = (key.path(), cert.map(KeyMaterial::path));
    match on_disk {
        (Some(key_path), None) => session.userauth_pubkey_file(user, None, key_path, passphrase),
        (Some(key_path), Some(Some(cert_path))) => {
            session.userauth_pubkey_file(user, Some(cert_path), key_path, passphrase)
        }
        _ => {
            let key = key.read()?;
            let cert = cert.map(KeyMaterial::read).transpose()?;
            session.userauth_pubkey_memory(user, cert.as_deref(), &key, passphrase)
        }
    }
    .map_err(|e| SshError::protocol(host, e))
}

/// Methods to try, in priority order: private key (a certificate-signed key
/// when a certificate is configured), password, then agent.
pub fn auth_methods(creds: &SshCredentials) -> Vec<AuthMethod> {
    let mut methods = Vec::new();
    let passphrase = creds.key_passphrase.clone().filter(|p| !p.is_empty());

    if let Some(key) = KeyMaterial::from_parts(creds.key.as_ref(), creds.key_path.as_ref()) {
        match KeyMaterial::from_parts(creds.cert.as_ref(), creds.cert_path.as_ref()) {
            Some(cert) => methods.push(AuthMethod::Certificate {
                key,
                cert,
                passphrase,
            }),
            None => methods.push(AuthMethod::PrivateKey { key, passphrase }),
        }
    }
    if let Some(password) = creds.password.as_ref().filter(|p| !p.is_empty()) {
        methods.push(AuthMethod::Password(password.clone()));
    }
    if creds.agent_auth {
        methods.push(AuthMethod::Agent);
    }
    debug!(
        methods = ?methods.iter().map(AuthMethod::name).collect::<Vec<_>>(),
        "Resolved ssh auth methods"
    );
    methods
}
