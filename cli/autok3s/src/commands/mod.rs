//! CLI commands.

mod create;
mod delete;
mod join;
mod list;
mod ssh;

use std::path::PathBuf;

use anyhow::Result;
use autok3s_orchestrator::{Config, Orchestrator};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::output::OutputFormat;

/// autok3s - run K3s clusters on machines you can SSH into.
#[derive(Debug, Parser)]
#[command(name = "autok3s")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Log level or filter directive.
    #[arg(long, global = true, env = "AUTOK3S_LOG_LEVEL")]
    log_level: Option<String>,

    /// Directory for cluster state and logs.
    #[arg(long, global = true, env = "AUTOK3S_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Kubeconfig that cluster contexts are merged into.
    #[arg(long, global = true, env = "AUTOK3S_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a cluster.
    Create(create::CreateCommand),

    /// Join nodes to an existing cluster.
    Join(join::JoinCommand),

    /// Delete a cluster and uninstall K3s from its nodes.
    Delete(delete::DeleteCommand),

    /// List clusters.
    List(list::ListCommand),

    /// Show one cluster.
    Describe(list::DescribeCommand),

    /// Open a shell on a cluster node.
    Ssh(ssh::SshCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Run the command and return the process exit code.
    pub async fn run(self) -> Result<i32> {
        let format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        };

        let mut config = Config::from_env()?;
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(path) = self.kubeconfig {
            config.kubeconfig = path;
        }

        let ctx = CommandContext { config, format };

        match self.command {
            Commands::Create(cmd) => cmd.run(ctx).await.map(|_| 0),
            Commands::Join(cmd) => cmd.run(ctx).await.map(|_| 0),
            Commands::Delete(cmd) => cmd.run(ctx).await.map(|_| 0),
            Commands::List(cmd) => cmd.run(ctx).await.map(|_| 0),
            Commands::Describe(cmd) => cmd.run(ctx).await.map(|_| 0),
            Commands::Ssh(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("autok3s {}", env!("CARGO_PKG_VERSION"));
                Ok(0)
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
}

impl CommandContext {
    /// An orchestrator whose operations stop on Ctrl-C.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let orchestrator = Orchestrator::from_config(self.config.clone())?;

        let cancel = orchestrator.cancellation_token().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });

        Ok(orchestrator)
    }
}
