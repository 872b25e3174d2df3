//! Configuration for the orchestrator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use autok3s_ssh::RetryPolicy;
use directories::{BaseDirs, ProjectDirs};

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding the state database and cluster logs.
    pub data_dir: PathBuf,

    /// Shared kubeconfig that cluster contexts are merged into.
    pub kubeconfig: PathBuf,

    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive.
    pub log_level: String,

    /// Backoff schedule for SSH dials.
    pub ssh_retry: RetryPolicy,

    /// Bound for one SSH connect + handshake + auth attempt.
    pub ssh_connect_timeout: Duration,

    /// How long to wait for the kubeconfig lock.
    pub kubeconfig_lock_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("AUTOK3S_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let kubeconfig = lookup("AUTOK3S_KUBECONFIG")
            .or_else(|| lookup("KUBECONFIG").and_then(first_path))
            .map(PathBuf::from)
            .unwrap_or_else(default_kubeconfig);

        let log_level = lookup("AUTOK3S_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let defaults = RetryPolicy::default();
        let ssh_retry = RetryPolicy {
            max_attempts: parse(&lookup, "AUTOK3S_SSH_RETRY_ATTEMPTS")?
                .unwrap_or(defaults.max_attempts),
            initial_delay: parse(&lookup, "AUTOK3S_SSH_RETRY_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.initial_delay),
            max_delay: parse(&lookup, "AUTOK3S_SSH_RETRY_MAX_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_delay),
            backoff_multiplier: defaults.backoff_multiplier,
        };

        // Dials are always bounded; 0 would mean retry forever.
        if ssh_retry.max_attempts == 0 {
            bail!("Invalid value for AUTOK3S_SSH_RETRY_ATTEMPTS: must be at least 1");
        }

        let ssh_connect_timeout = parse(&lookup, "AUTOK3S_SSH_CONNECT_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let kubeconfig_lock_timeout = parse(&lookup, "AUTOK3S_KUBECONFIG_LOCK_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            data_dir,
            kubeconfig,
            log_level,
            ssh_retry,
            ssh_connect_timeout,
            kubeconfig_lock_timeout,
        })
    }

    /// Defaults rooted at `data_dir`, with the kubeconfig inside it.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            kubeconfig: data_dir.join("kubeconfig"),
            data_dir,
            log_level: "info".to_string(),
            ssh_retry: RetryPolicy::default(),
            ssh_connect_timeout: Duration::from_secs(30),
            kubeconfig_lock_timeout: Duration::from_secs(30),
        }
    }

    /// SQLite state database.
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("autok3s.db")
    }

    /// Directory of per-cluster log files.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {:?}", key, value))
        })
        .transpose()
}

/// First entry of a `KUBECONFIG` path list.
fn first_path(list: String) -> Option<String> {
    list.split(':')
        .map(str::trim)
        .find(|p| !p.is_empty())
        .map(str::to_string)
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("io", "autok3s", "autok3s")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".autok3s"))
}

fn default_kubeconfig() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".kube").join("config"))
        .unwrap_or_else(|| PathBuf::from(".kube/config"))
}
