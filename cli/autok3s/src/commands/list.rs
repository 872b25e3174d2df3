//! List and describe commands.

use anyhow::Result;
use autok3s_orchestrator::{NativeOptions, NativeProvider, Provider};
use autok3s_types::{ClusterState, SshCredentials};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use super::CommandContext;
use crate::output::{print_output, print_single};

#[derive(Debug, Args)]
pub struct ListCommand {}

#[derive(Debug, Serialize, Tabled)]
struct ClusterRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PROVIDER")]
    provider: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "MASTERS")]
    masters: usize,
    #[tabled(rename = "WORKERS")]
    workers: usize,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

impl From<&ClusterState> for ClusterRow {
    fn from(state: &ClusterState) -> Self {
        let metadata = &state.cluster.metadata;
        Self {
            name: metadata.name.clone(),
            provider: metadata.provider.clone(),
            status: state.status.as_str().to_string(),
            masters: state.cluster.status.master_nodes.len(),
            workers: state.cluster.status.worker_nodes.len(),
            version: metadata
                .k3s_version()
                .or(metadata.k3s_channel.as_deref())
                .unwrap_or("stable")
                .to_string(),
            created: state.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl ListCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let orchestrator = ctx.orchestrator()?;
        let rows: Vec<ClusterRow> = orchestrator
            .list_clusters()?
            .iter()
            .map(ClusterRow::from)
            .collect();
        print_output(&rows, ctx.format);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct DescribeCommand {
    /// Cluster name.
    #[arg(long, short = 'n')]
    name: String,

    /// Check the backend and mark the cluster Missing when it is gone.
    #[arg(long)]
    refresh: bool,
}

impl DescribeCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let orchestrator = ctx.orchestrator()?;
        let provider = NativeProvider::new(NativeOptions::default(), orchestrator.runner());

        let state = if self.refresh {
            orchestrator.refresh_status(&provider, &self.name).await?
        } else {
            orchestrator.describe(provider.name(), &self.name)?
        };
        print_single(&redacted(state), ctx.format);
        Ok(())
    }
}

/// `state` with SSH secrets blanked.
pub(super) fn redacted(mut state: ClusterState) -> ClusterState {
    fn scrub(ssh: &mut SshCredentials) {
        for secret in [&mut ssh.password, &mut ssh.key, &mut ssh.key_passphrase, &mut ssh.cert] {
            if secret.is_some() {
                *secret = Some("<redacted>".to_string());
            }
        }
    }

    scrub(&mut state.cluster.ssh);
    let status = &mut state.cluster.status;
    for node in status.master_nodes.iter_mut().chain(status.worker_nodes.iter_mut()) {
        scrub(&mut node.ssh);
    }
    state
}
