//! Interactive shells on cluster nodes.
//!
//! A [`Terminal`] streams remote output to a writer chosen with
//! [`Terminal::set_io`], accepts keystrokes through [`Terminal::write`] and
//! receives window changes on a control path separate from the data path.
//! All methods take `&self` so input forwarding, resize polling and
//! [`Terminal::wait`] can run concurrently against one shell.

use std::io::Write;

use async_trait::async_trait;

use crate::error::TerminalError;

mod pty;
mod ssh;

pub use pty::PtyShell;
pub use ssh::SshShell;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl WindowSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Out-of-band messages for a running shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellControl {
    Resize(WindowSize),
    Close,
}

/// An interactive shell session.
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Destination for shell output. Must be called before
    /// [`open_terminal`](Terminal::open_terminal); defaults to stdout.
    fn set_io(&self, output: Box<dyn Write + Send>);

    /// Allocate a terminal of `window` size and start the shell.
    async fn open_terminal(&self, window: WindowSize) -> Result<(), TerminalError>;

    fn change_window_size(&self, window: WindowSize) -> Result<(), TerminalError>;

    /// Forward input bytes to the shell.
    fn write(&self, data: &[u8]) -> Result<(), TerminalError>;

    /// Resolve with the shell's exit status once it ends.
    async fn wait(&self) -> Result<i32, TerminalError>;

    /// Ask the shell to end; [`wait`](Terminal::wait) then resolves.
    fn close(&self) -> Result<(), TerminalError>;
}
