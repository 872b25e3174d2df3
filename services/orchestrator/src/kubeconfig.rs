//! Kubeconfig rewrite and merge.
//!
//! A freshly bootstrapped master serves a kubeconfig pointing at
//! `127.0.0.1` with every entry named `default`. Before it is merged into
//! the shared kubeconfig the server host is replaced with a reachable
//! address and the cluster, user and context entries are renamed to the
//! cluster's context name.
//!
//! Every read-modify-write of the shared file holds an exclusive `flock` on
//! `<kubeconfig>.lock`, so concurrent `autok3s` processes never interleave.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from kubeconfig handling.
#[derive(Debug, Error)]
pub enum KubeconfigError {
    #[error("failed to parse kubeconfig: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid kubeconfig: {0}")]
    Invalid(String),

    #[error("context {0} already exists in kubeconfig")]
    ContextExists(String),

    #[error("kubeconfig io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {timeout:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: Errno,
    },
}

/// The shared kubeconfig file.
#[derive(Debug, Clone)]
pub struct KubeconfigFile {
    path: PathBuf,
    lock_timeout: Duration,
}

impl KubeconfigFile {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite `raw` for `context` and merge it in.
    ///
    /// Refuses to overwrite an existing context of the same name.
    pub async fn merge(&self, context: &str, raw: &str, server_ip: &str) -> Result<(), KubeconfigError> {
        let incoming = prepare(raw, context, server_ip)?;

        let _lock = self.lock().await?;
        let mut config = self.load().await?;
        merge_into(&mut config, incoming, context)?;
        self.store(&config).await?;

        info!(context = %context, path = %self.path.display(), "Merged kubeconfig context");
        Ok(())
    }

    /// Remove `context` and the cluster and user it references.
    /// Returns false when the context was not present.
    pub async fn remove_context(&self, context: &str) -> Result<bool, KubeconfigError> {
        let _lock = self.lock().await?;
        if !tokio::fs::try_exists(&self.path).await.map_err(|e| self.io(e))? {
            return Ok(false);
        }

        let mut config = self.load().await?;
        let removed = remove_from(&mut config, context)?;
        if removed {
            self.store(&config).await?;
            info!(context = %context, path = %self.path.display(), "Removed kubeconfig context");
        } else {
            debug!(context = %context, "Kubeconfig context not present");
        }
        Ok(removed)
    }

    /// Names of every context in the file.
    pub async fn contexts(&self) -> Result<Vec<String>, KubeconfigError> {
        if !tokio::fs::try_exists(&self.path).await.map_err(|e| self.io(e))? {
            return Ok(Vec::new());
        }
        let config = self.load().await?;
        Ok(config
            .get("contexts")
            .and_then(Value::as_sequence)
            .map(|entries| entries.iter().filter_map(name_of).map(str::to_string).collect())
            .unwrap_or_default())
    }

    fn io(&self, source: io::Error) -> KubeconfigError {
        KubeconfigError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn lock(&self) -> Result<Flock<std::fs::File>, KubeconfigError> {
        let path = lock_path(&self.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io(e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| KubeconfigError::Io {
                path: path.clone(),
                source,
            })?;
        let deadline = Instant::now() + self.lock_timeout;

        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(guard) => return Ok(guard),
                Err((returned, errno)) if errno == Errno::EWOULDBLOCK => {
                    if Instant::now() >= deadline {
                        return Err(KubeconfigError::LockTimeout {
                            path,
                            timeout: self.lock_timeout,
                        });
                    }
                    file = returned;
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err((_, source)) => return Err(KubeconfigError::Lock { path, source }),
            }
        }
    }

    async fn load(&self) -> Result<Value, KubeconfigError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(self.io(e)),
        };
        if content.trim().is_empty() {
            return Ok(empty_config());
        }
        match serde_yaml::from_str(&content)? {
            Value::Null => Ok(empty_config()),
            config => Ok(config),
        }
    }

    /// Write through a temp file and rename, owner-only permissions.
    async fn store(&self, config: &Value) -> Result<(), KubeconfigError> {
        let content = serde_yaml::to_string(config)?;
        let tmp = self.path.with_extension("autok3s.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| self.io(e))?;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| self.io(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io(e))
    }
}

/// `<kubeconfig>.lock`
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn empty_config() -> Value {
    let mut config = Mapping::new();
    config.insert("apiVersion".into(), "v1".into());
    config.insert("kind".into(), "Config".into());
    config.insert("clusters".into(), Value::Sequence(Vec::new()));
    config.insert("contexts".into(), Value::Sequence(Vec::new()));
    config.insert("users".into(), Value::Sequence(Vec::new()));
    config.insert("current-context".into(), "".into());
    config.insert("preferences".into(), Value::Mapping(Mapping::new()));
    Value::Mapping(config)
}

fn name_of(entry: &Value) -> Option<&str> {
    entry.get("name").and_then(Value::as_str)
}

fn set(entry: &mut Value, key: &str, value: &str) -> Result<(), KubeconfigError> {
    entry
        .as_mapping_mut()
        .ok_or_else(|| KubeconfigError::Invalid(format!("entry holding {} is not a mapping", key)))?
        .insert(key.into(), value.into());
    Ok(())
}

/// The list under `key`, created when missing or null.
fn list_mut<'a>(config: &'a mut Value, key: &str) -> Result<&'a mut Vec<Value>, KubeconfigError> {
    let map = config
        .as_mapping_mut()
        .ok_or_else(|| KubeconfigError::Invalid("top level is not a mapping".to_string()))?;
    if map.get(key).map_or(true, Value::is_null) {
        map.insert(key.into(), Value::Sequence(Vec::new()));
    }
    map.get_mut(key)
        .and_then(Value::as_sequence_mut)
        .ok_or_else(|| KubeconfigError::Invalid(format!("{} is not a list", key)))
}

/// Replace a loopback server host with `ip`, keeping scheme, port and path.
pub fn rewrite_server(server: &str, ip: &str) -> String {
    let (scheme, rest) = server.split_once("://").unwrap_or(("https", server));
    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };

    let (host, port) = match authority.strip_prefix('[') {
        Some(v6) => match v6.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':')),
            None => (authority, None),
        },
        None => match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        },
    };

    if !matches!(host, "127.0.0.1" | "localhost" | "::1") {
        return server.to_string();
    }

    let host = if ip.contains(':') {
        format!("[{}]", ip)
    } else {
        ip.to_string()
    };
    match port {
        Some(port) => format!("{}://{}:{}{}", scheme, host, port, path),
        None => format!("{}://{}{}", scheme, host, path),
    }
}

/// Parse a node-side kubeconfig and rename everything to `context`.
pub fn prepare(raw: &str, context: &str, server_ip: &str) -> Result<Value, KubeconfigError> {
    let mut config: Value = serde_yaml::from_str(raw)?;

    let clusters = list_mut(&mut config, "clusters")?;
    if clusters.is_empty() {
        return Err(KubeconfigError::Invalid("no clusters defined".to_string()));
    }
    for cluster in clusters.iter_mut() {
        set(cluster, "name", context)?;
        if let Some(server) = cluster.get_mut("cluster").and_then(|c| c.get_mut("server")) {
            let old = server.as_str().unwrap_or_default().to_string();
            let new = rewrite_server(&old, server_ip);
            debug!(old_server = %old, new_server = %new, "Rewrote kubeconfig server");
            *server = Value::String(new);
        }
    }

    let users = list_mut(&mut config, "users")?;
    if users.is_empty() {
        return Err(KubeconfigError::Invalid("no users defined".to_string()));
    }
    for user in users.iter_mut() {
        set(user, "name", context)?;
    }

    for entry in list_mut(&mut config, "contexts")?.iter_mut() {
        set(entry, "name", context)?;
        if let Some(inner) = entry.get_mut("context") {
            set(inner, "cluster", context)?;
            set(inner, "user", context)?;
        }
    }
    set(&mut config, "current-context", context)?;
    Ok(config)
}

/// Merge a prepared kubeconfig into `config` and make `context` current.
pub fn merge_into(config: &mut Value, incoming: Value, context: &str) -> Result<(), KubeconfigError> {
    if list_mut(config, "contexts")?
        .iter()
        .any(|entry| name_of(entry) == Some(context))
    {
        return Err(KubeconfigError::ContextExists(context.to_string()));
    }

    let mut incoming = incoming;
    for key in ["clusters", "users", "contexts"] {
        let entries = std::mem::take(list_mut(&mut incoming, key)?);
        let target = list_mut(config, key)?;
        target.retain(|entry| name_of(entry) != Some(context));
        target.extend(entries);
    }
    set(config, "current-context", context)
}

/// Remove `context` and the cluster and user it references.
pub fn remove_from(config: &mut Value, context: &str) -> Result<bool, KubeconfigError> {
    let contexts = list_mut(config, "contexts")?;
    let Some(index) = contexts.iter().position(|entry| name_of(entry) == Some(context)) else {
        return Ok(false);
    };
    let removed = contexts.remove(index);

    let reference = |key: &str| {
        removed
            .get("context")
            .and_then(|inner| inner.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    if let Some(cluster) = reference("cluster") {
        list_mut(config, "clusters")?.retain(|entry| name_of(entry) != Some(cluster.as_str()));
    }
    if let Some(user) = reference("user") {
        list_mut(config, "users")?.retain(|entry| name_of(entry) != Some(user.as_str()));
    }

    if config.get("current-context").and_then(Value::as_str) == Some(context) {
        set(config, "current-context", "")?;
    }
    Ok(true)
}
