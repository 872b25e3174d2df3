//! Delete command.

use anyhow::Result;
use autok3s_orchestrator::{NativeOptions, NativeProvider, Provider, StdinPrompt};
use clap::Args;

use super::CommandContext;
use crate::output::{print_info, print_success};

#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Cluster name.
    #[arg(long, short = 'n')]
    name: String,

    /// Skip the confirmation and keep going past failed cleanup steps.
    #[arg(long, short = 'f')]
    force: bool,
}

impl DeleteCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let orchestrator = ctx.orchestrator()?;
        let provider = NativeProvider::new(NativeOptions::default(), orchestrator.runner());

        let deleted = orchestrator
            .delete_cluster(&provider, &self.name, self.force, &StdinPrompt)
            .await?;

        if deleted {
            print_success(&format!("Cluster {} deleted", provider.context_name(&self.name)));
        } else {
            print_info("Nothing deleted");
        }
        Ok(())
    }
}
