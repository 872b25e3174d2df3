//! # autok3s-ssh
//!
//! Remote command execution for cluster nodes.
//!
//! - [`SshClient`] dials a node with exponential backoff, detects whether
//!   commands need `sudo`, and runs command batches through a base64
//!   wrapped `sh -` so arbitrary content survives the remote shell
//! - [`Terminal`] is the interactive shell surface, implemented over SSH
//!   ([`SshShell`]) and over a local PTY ([`PtyShell`]) for container and
//!   local backends
//!
//! The ssh2 bindings are blocking; every blocking call runs on
//! `tokio::task::spawn_blocking` or a dedicated thread.

mod auth;
mod client;
mod error;
mod protocol;
mod retry;
pub mod terminal;

pub use auth::{auth_methods, AuthMethod, KeyMaterial};
pub use client::{SshClient, SshTarget};
pub use error::{SshError, TerminalError};
pub use protocol::{wrap_commands, PRIVILEGE_CHECK};
pub use retry::{retry_with_backoff, Cancelled, RetryPolicy};
pub use terminal::{PtyShell, ShellControl, SshShell, Terminal, WindowSize};
