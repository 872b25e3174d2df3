//! Shell in a local pseudo-terminal.
//!
//! Covers backends whose nodes are reachable from this host without SSH:
//! container runtimes (`docker exec -it <id> sh`) and the local machine.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;

use async_trait::async_trait;
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::sync::oneshot;
use tracing::debug;

use super::{Terminal, WindowSize};
use crate::error::TerminalError;

type ExitReceiver = oneshot::Receiver<Result<i32, TerminalError>>;

/// A program attached to a local PTY.
pub struct PtyShell {
    program: String,
    args: Vec<String>,
    output: Mutex<Option<Box<dyn Write + Send>>>,
    master: Mutex<Option<File>>,
    pid: Mutex<Option<Pid>>,
    exit: Mutex<Option<ExitReceiver>>,
}

impl PtyShell {
    /// Run `program args..` in a PTY.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            output: Mutex::new(None),
            master: Mutex::new(None),
            pid: Mutex::new(None),
            exit: Mutex::new(None),
        }
    }

    /// A login shell on this machine: `shell`, else `$SHELL`, else `/bin/sh`.
    pub fn local(shell: Option<&str>) -> Self {
        let program = shell
            .map(str::to_string)
            .or_else(|| std::env::var("SHELL").ok())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string());
        Self::new(program, Vec::<String>::new())
    }

    /// `sh` inside container `id` via the runtime's `exec -it`.
    pub fn container(runtime: &str, id: &str) -> Self {
        Self::new(runtime, ["exec", "-it", id, "sh"])
    }

    /// Command line this shell runs.
    pub fn command_line(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    fn spawn(&self, window: WindowSize) -> Result<(File, std::process::Child), TerminalError> {
        let OpenptyResult { master, slave } = openpty(Some(&winsize(window)), None)?;

        let child = {
            let stdin: OwnedFd = slave.try_clone()?;
            let stdout: OwnedFd = slave.try_clone()?;
            let mut command = Command::new(&self.program);
            command
                .args(&self.args)
                .env("TERM", "xterm")
                .stdin(Stdio::from(stdin))
                .stdout(Stdio::from(stdout))
                .stderr(Stdio::from(slave));
            // SAFETY: setsid and ioctl are async-signal-safe; stdin is
            // already the PTY slave when the hook runs.
            unsafe {
                command.pre_exec(|| {
                    if libc::setsid() < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    if libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
            command.spawn()?
            // `command` drops here, closing the parent's slave descriptors.
        };

        Ok((File::from(master), child))
    }
}

fn winsize(window: WindowSize) -> Winsize {
    Winsize {
        ws_row: window.rows,
        ws_col: window.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

#[async_trait]
impl Terminal for PtyShell {
    fn set_io(&self, output: Box<dyn Write + Send>) {
        if let Ok(mut guard) = self.output.lock() {
            *guard = Some(output);
        }
    }

    async fn open_terminal(&self, window: WindowSize) -> Result<(), TerminalError> {
        let mut master_slot = self.master.lock().map_err(|_| TerminalError::Closed)?;
        if master_slot.is_some() {
            return Err(TerminalError::AlreadyOpen);
        }

        let mut output = self
            .output
            .lock()
            .map_err(|_| TerminalError::Closed)?
            .take()
            .unwrap_or_else(|| Box::new(io::stdout()));
        let (master, mut child) = self.spawn(window)?;
        let mut reader = master.try_clone()?;

        let pid = Pid::from_raw(child.id() as i32);
        let (exit_tx, exit_rx) = oneshot::channel();

        let copier = thread::Builder::new()
            .name("pty-output".to_string())
            .spawn(move || {
                let mut buf = [0u8; 8192];
                // The master read fails with EIO once every slave is closed.
                while let Ok(n) = reader.read(&mut buf) {
                    if n == 0 || output.write_all(&buf[..n]).is_err() {
                        break;
                    }
                    let _ = output.flush();
                }
            })?;

        thread::Builder::new()
            .name("pty-wait".to_string())
            .spawn(move || {
                let status = child.wait().map(|status| {
                    status
                        .code()
                        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
                });
                let _ = copier.join();
                let _ = exit_tx.send(status.map_err(TerminalError::from));
            })?;

        *master_slot = Some(master);
        *self.pid.lock().map_err(|_| TerminalError::Closed)? = Some(pid);
        *self.exit.lock().map_err(|_| TerminalError::Closed)? = Some(exit_rx);
        debug!(command = ?self.command_line(), pid = pid.as_raw(), "Opened pty shell");
        Ok(())
    }

    fn change_window_size(&self, window: WindowSize) -> Result<(), TerminalError> {
        let guard = self.master.lock().map_err(|_| TerminalError::Closed)?;
        let master = guard.as_ref().ok_or(TerminalError::NotOpen)?;
        let size = winsize(window);
        // SAFETY: the descriptor is owned by `master` and `size` outlives the call.
        let rc = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, &size as *const Winsize) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        let mut guard = self.master.lock().map_err(|_| TerminalError::Closed)?;
        let master = guard.as_mut().ok_or(TerminalError::NotOpen)?;
        master.write_all(data)?;
        master.flush()?;
        Ok(())
    }

    async fn wait(&self) -> Result<i32, TerminalError> {
        let exit = self
            .exit
            .lock()
            .map_err(|_| TerminalError::Closed)?
            .take()
            .ok_or(TerminalError::NotOpen)?;
        exit.await.map_err(|_| TerminalError::Closed)?
    }

    fn close(&self) -> Result<(), TerminalError> {
        let pid = self
            .pid
            .lock()
            .map_err(|_| TerminalError::Closed)?
            .ok_or(TerminalError::NotOpen)?;
        match kill(pid, Signal::SIGHUP) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_command_line() {
        let shell = PtyShell::container("docker", "k3d-demo-server-0");
        assert_eq!(
            shell.command_line(),
            vec!["docker", "exec", "-it", "k3d-demo-server-0", "sh"]
        );
    }

    #[test]
    fn test_local_explicit_shell() {
        let shell = PtyShell::local(Some("/bin/bash"));
        assert_eq!(shell.command_line(), vec!["/bin/bash"]);
    }

    #[test]
    fn test_not_open_errors() {
        let shell = PtyShell::local(Some("/bin/sh"));
        assert!(matches!(shell.write(b"ls\n"), Err(TerminalError::NotOpen)));
        assert!(matches!(
            shell.change_window_size(WindowSize::default()),
            Err(TerminalError::NotOpen)
        ));
        assert!(matches!(shell.close(), Err(TerminalError::NotOpen)));
    }
}
