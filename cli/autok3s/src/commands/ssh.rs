//! Interactive shell on a cluster node.

use std::io::{self, IsTerminal, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use autok3s_orchestrator::{NativeOptions, NativeProvider, OrchestratorError, Provider};
use autok3s_ssh::{Terminal, WindowSize};
use clap::Args;
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use tracing::debug;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct SshCommand {
    /// Cluster name.
    #[arg(long, short = 'n')]
    name: String,

    /// Node instance id; the bootstrap master when omitted.
    #[arg(long)]
    node: Option<String>,
}

impl SshCommand {
    /// Returns the remote shell's exit status.
    pub async fn run(self, ctx: CommandContext) -> Result<i32> {
        let orchestrator = ctx.orchestrator()?;
        let provider = NativeProvider::new(NativeOptions::default(), orchestrator.runner());

        let node = match self.node {
            Some(node) => node,
            None => orchestrator
                .describe(provider.name(), &self.name)?
                .cluster
                .first_master()
                .map(|n| n.instance_id.clone())
                .ok_or_else(|| OrchestratorError::NoMaster {
                    name: self.name.clone(),
                })?,
        };

        let shell: Arc<dyn Terminal> =
            Arc::from(orchestrator.open_terminal(&provider, &self.name, &node).await?);
        shell.set_io(Box::new(io::stdout()));

        let use_tty = io::stdin().is_terminal();
        let (cols, rows) = if use_tty {
            terminal::size().unwrap_or((80, 24))
        } else {
            (80, 24)
        };

        let _raw_guard = if use_tty {
            enable_raw_mode().ok();
            Some(RawModeGuard)
        } else {
            None
        };

        shell
            .open_terminal(WindowSize::new(cols, rows))
            .await
            .with_context(|| format!("failed to start shell on {}", node))?;

        let running = Arc::new(AtomicBool::new(true));

        // The reader blocks on stdin; it is left behind when the shell ends.
        let stdin_shell = Arc::clone(&shell);
        let running_stdin = running.clone();
        tokio::task::spawn_blocking(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; 1024];
            while running_stdin.load(Ordering::SeqCst) {
                match stdin.read(&mut buf) {
                    Ok(0) => {
                        let _ = stdin_shell.close();
                        break;
                    }
                    Ok(n) => {
                        if stdin_shell.write(&buf[..n]).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });

        let resize_handle = if use_tty {
            let resize_shell = Arc::clone(&shell);
            let running_resize = running.clone();
            Some(tokio::spawn(async move {
                let mut last_size = (cols, rows);
                while running_resize.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    if let Ok(size) = terminal::size() {
                        if size != last_size {
                            last_size = size;
                            if let Err(e) =
                                resize_shell.change_window_size(WindowSize::new(size.0, size.1))
                            {
                                debug!(error = %e, "Failed to resize shell");
                            }
                        }
                    }
                }
            }))
        } else {
            None
        };

        let status = shell.wait().await;
        running.store(false, Ordering::SeqCst);
        if let Some(handle) = resize_handle {
            handle.abort();
        }

        Ok(status?)
    }
}

struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}
