//! Create command.

use std::path::PathBuf;

use anyhow::Result;
use autok3s_orchestrator::{NativeProvider, NodeRegistry, Provider};
use clap::Args;
use tracing::{error, info};

use super::list::redacted;
use super::CommandContext;
use crate::config::{ClusterFile, ClusterFlags};
use crate::error::CliError;
use crate::output::{print_info, print_single, print_success, OutputFormat};

#[derive(Debug, Args)]
pub struct CreateCommand {
    /// Cluster file (TOML). Flags override its values.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Leave installed hosts alone when create fails.
    #[arg(long)]
    no_rollback: bool,

    #[command(flatten)]
    flags: ClusterFlags,
}

impl CreateCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let mut file = match &self.config {
            Some(path) => ClusterFile::load(path)?,
            None => ClusterFile::parse("")?,
        };
        self.flags.apply(&mut file)?;

        let (cluster, hosts) = file.into_parts();
        if hosts.master_ips.iter().all(|ip| ip.trim().is_empty()) {
            return Err(CliError::NoMasters.into());
        }

        let orchestrator = ctx.orchestrator()?;
        let provider = NativeProvider::new(hosts, orchestrator.runner());
        let registry = NodeRegistry::new();

        let state = match orchestrator.init_cluster(&provider, &registry, cluster).await {
            Ok(state) => state,
            Err(e) => {
                if self.no_rollback {
                    info!("Skipping rollback");
                } else if let Err(rollback) = provider.rollback(&registry).await {
                    error!(error = %format!("{:#}", rollback), "Rollback failed");
                }
                return Err(e.into());
            }
        };

        let context = provider.context_name(state.name());
        match ctx.format {
            OutputFormat::Json => print_single(&redacted(state), ctx.format),
            OutputFormat::Table => {
                print_success(&format!(
                    "Cluster {} is running ({} masters, {} workers)",
                    state.name(),
                    state.cluster.status.master_nodes.len(),
                    state.cluster.status.worker_nodes.len()
                ));
                print_info(&format!(
                    "kubectl --kubeconfig {} --context {} get nodes",
                    orchestrator.config().kubeconfig.display(),
                    context
                ));
            }
        }
        Ok(())
    }
}
