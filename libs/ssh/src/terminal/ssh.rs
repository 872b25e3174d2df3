//! Shell over an SSH channel.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{Channel, Session};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{ShellControl, Terminal, WindowSize};
use crate::error::TerminalError;

const PUMP_IDLE: Duration = Duration::from_millis(10);

type ExitReceiver = oneshot::Receiver<Result<i32, TerminalError>>;

/// Interactive shell on an authenticated SSH session.
///
/// Once open, a pump thread owns the channel: it copies output to the
/// configured writer and applies queued input and control messages.
pub struct SshShell {
    host: String,
    session: Mutex<Option<Session>>,
    output: Mutex<Option<Box<dyn Write + Send>>>,
    input: Mutex<Option<Sender<Vec<u8>>>>,
    control: Mutex<Option<Sender<ShellControl>>>,
    exit: Mutex<Option<ExitReceiver>>,
}

impl SshShell {
    pub(crate) fn new(host: String, session: Session) -> Self {
        Self {
            host,
            session: Mutex::new(Some(session)),
            output: Mutex::new(None),
            input: Mutex::new(None),
            control: Mutex::new(None),
            exit: Mutex::new(None),
        }
    }

    fn send_control(&self, message: ShellControl) -> Result<(), TerminalError> {
        let guard = self.control.lock().map_err(|_| TerminalError::Closed)?;
        let tx = guard.as_ref().ok_or(TerminalError::NotOpen)?;
        tx.send(message).map_err(|_| TerminalError::Closed)
    }
}

#[async_trait]
impl Terminal for SshShell {
    fn set_io(&self, output: Box<dyn Write + Send>) {
        if let Ok(mut guard) = self.output.lock() {
            *guard = Some(output);
        }
    }

    async fn open_terminal(&self, window: WindowSize) -> Result<(), TerminalError> {
        let session = self
            .session
            .lock()
            .map_err(|_| TerminalError::Closed)?
            .take()
            .ok_or(TerminalError::AlreadyOpen)?;
        let output = self
            .output
            .lock()
            .map_err(|_| TerminalError::Closed)?
            .take()
            .unwrap_or_else(|| Box::new(io::stdout()));

        let (session, channel) = tokio::task::spawn_blocking(move || {
            let mut channel = session.channel_session()?;
            channel.request_pty(
                "xterm",
                None,
                Some((window.cols.into(), window.rows.into(), 0, 0)),
            )?;
            channel.shell()?;
            Ok::<_, TerminalError>((session, channel))
        })
        .await??;

        let (input_tx, input_rx) = mpsc::channel();
        let (control_tx, control_rx) = mpsc::channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        let host = self.host.clone();
        thread::Builder::new()
            .name("ssh-shell".to_string())
            .spawn(move || {
                let result = pump(&session, channel, output, input_rx, control_rx);
                if let Err(e) = &result {
                    warn!(host = %host, error = %e, "Shell session ended with error");
                }
                let _ = exit_tx.send(result);
            })?;

        *self.input.lock().map_err(|_| TerminalError::Closed)? = Some(input_tx);
        *self.control.lock().map_err(|_| TerminalError::Closed)? = Some(control_tx);
        *self.exit.lock().map_err(|_| TerminalError::Closed)? = Some(exit_rx);
        debug!(host = %self.host, cols = window.cols, rows = window.rows, "Opened ssh shell");
        Ok(())
    }

    fn change_window_size(&self, window: WindowSize) -> Result<(), TerminalError> {
        self.send_control(ShellControl::Resize(window))
    }

    fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        let guard = self.input.lock().map_err(|_| TerminalError::Closed)?;
        let tx = guard.as_ref().ok_or(TerminalError::NotOpen)?;
        tx.send(data.to_vec()).map_err(|_| TerminalError::Closed)
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
        self.send_control(ShellControl::Close)
    }
}

/// Copy channel output until the remote side ends or a close is requested.
///
/// The session is non-blocking while polling; writes and resizes switch it
/// back to blocking for their duration.
fn pump(
    session: &Session,
    mut channel: Channel,
    mut output: Box<dyn Write + Send>,
    input: Receiver<Vec<u8>>,
    control: Receiver<ShellControl>,
) -> Result<i32, TerminalError> {
    session.set_blocking(false);
    let mut buf = [0u8; 8192];

    loop {
        let mut idle = true;

        match channel.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                output.write_all(&buf[..n])?;
                output.flush()?;
                idle = false;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                session.set_blocking(true);
                return Err(e.into());
            }
        }

        while let Ok(data) = input.try_recv() {
            session.set_blocking(true);
            let written = channel.write_all(&data).and_then(|_| channel.flush());
            session.set_blocking(false);
            written?;
            idle = false;
        }

        match control.try_recv() {
            Ok(ShellControl::Resize(window)) => {
                session.set_blocking(true);
                let resized =
                    channel.request_pty_size(window.cols.into(), window.rows.into(), None, None);
                session.set_blocking(false);
                resized?;
            }
            Ok(ShellControl::Close) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        if channel.eof() {
            break;
        }
        if idle {
            thread::sleep(PUMP_IDLE);
        }
    }

    session.set_blocking(true);
    let _ = channel.send_eof();
    channel.close()?;
    channel.wait_close()?;
    Ok(channel.exit_status()?)
}
