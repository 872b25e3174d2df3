//! Join command.

use anyhow::Result;
use autok3s_orchestrator::{NativeProvider, NodeRegistry};
use clap::Args;

use super::list::redacted;
use super::CommandContext;
use crate::config::HostFlags;
use crate::error::CliError;
use crate::output::{print_single, print_success, OutputFormat};

/// New hosts log in with the cluster's SSH credentials.
#[derive(Debug, Args)]
pub struct JoinCommand {
    /// Cluster to join.
    #[arg(long, short = 'n')]
    name: String,

    #[command(flatten)]
    hosts: HostFlags,
}

impl JoinCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(CliError::NoHosts.into());
        }

        let orchestrator = ctx.orchestrator()?;
        let provider = NativeProvider::new(self.hosts.into_options(), orchestrator.runner());
        let registry = NodeRegistry::new();

        let state = orchestrator.join_nodes(&provider, &registry, &self.name).await?;

        match ctx.format {
            OutputFormat::Json => print_single(&redacted(state), ctx.format),
            OutputFormat::Table => print_success(&format!(
                "Cluster {} now has {} masters and {} workers",
                state.name(),
                state.cluster.status.master_nodes.len(),
                state.cluster.status.worker_nodes.len()
            )),
        }
        Ok(())
    }
}
