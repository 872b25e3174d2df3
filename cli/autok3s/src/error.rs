//! Error handling and display for the CLI.

use std::path::PathBuf;

use autok3s_orchestrator::{KubeconfigError, OrchestratorError};
use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read cluster file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cluster file {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no master hosts given")]
    NoMasters,

    #[error("no hosts given to join")]
    NoHosts,
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::NoMasters => hint("Pass --master-ips or set [native] master_ips in the cluster file."),
            CliError::NoHosts => hint("Pass --master-ips and/or --worker-ips with the new hosts."),
            CliError::ParseConfig { .. } => {
                hint("The cluster file has [metadata], [ssh] and [native] tables.")
            }
            CliError::ReadConfig { .. } => {}
        }
        return;
    }

    if let Some(orch_err) = err.downcast_ref::<OrchestratorError>() {
        match orch_err {
            OrchestratorError::NotFound { .. } => {
                hint("Run `autok3s list` to see known clusters.")
            }
            OrchestratorError::NotRunning { name, .. } => hint(&format!(
                "Run `autok3s delete --name {}` and create the cluster again.",
                name
            )),
            OrchestratorError::AlreadyExists { name, .. } => hint(&format!(
                "Choose another name or run `autok3s delete --name {}` first.",
                name
            )),
            OrchestratorError::Validation(v) if v.is_datastore_error() => hint(
                "Use --cluster for embedded etcd or --datastore for an external datastore, not both.",
            ),
            OrchestratorError::Node { .. } => {
                if let Some(output) = orch_err.remote_output() {
                    eprintln!("\n{}", "Remote output:".bold());
                    eprintln!("{}", output.trim_end().dimmed());
                }
                hint("The cluster log under the data directory has the full transcript.");
            }
            OrchestratorError::Cancelled => {
                hint("Nodes that were already installed were left in place.")
            }
            OrchestratorError::Kubeconfig(KubeconfigError::LockTimeout { path, .. }) => {
                hint(&format!(
                    "Another autok3s process holds {}; retry once it finishes.",
                    path.display()
                ))
            }
            _ => {}
        }
    }
}

fn hint(message: &str) {
    eprintln!("\n{}", format!("Hint: {}", message).yellow());
}
