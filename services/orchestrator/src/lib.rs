//! autok3s cluster orchestrator
//!
//! Drives the lifecycle of K3s clusters on pluggable compute backends.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator
//! ├── Provider        (backend hooks: create/join/delete instances)
//! ├── NodeRegistry    (concurrent instance_id -> Node map filled by providers)
//! ├── CommandRunner   (SSH in production, MockRunner in tests)
//! ├── ClusterStore    (SQLite persistence of ClusterState)
//! └── KubeconfigFile  (locked merge of cluster contexts)
//! ```
//!
//! ## Modules
//!
//! - `orchestrator`: create/join/delete/refresh lifecycle
//! - `provider`: backend trait and the native (bare SSH host) provider
//! - `registry`: concurrency-safe node registry
//! - `runner`: remote command execution seam
//! - `state`: SQLite state persistence
//! - `kubeconfig`: kubeconfig rewrite and merge
//! - `logging`: per-cluster log files

pub mod config;
pub mod error;
pub mod kubeconfig;
pub mod logging;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod runner;
pub mod state;
pub mod token;

pub use config::Config;
pub use error::OrchestratorError;
pub use kubeconfig::{KubeconfigError, KubeconfigFile};
pub use logging::ClusterLog;
pub use orchestrator::Orchestrator;
pub use prompt::{FixedPrompt, Prompt, StdinPrompt};
pub use provider::{NativeOptions, NativeProvider, Provider};
pub use registry::NodeRegistry;
pub use runner::{CommandRunner, MockRunner, RunCall, SshRunner, SAMPLE_K3S_KUBECONFIG};
pub use state::{ClusterStore, SqliteStore, StoreError};
