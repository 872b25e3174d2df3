//! Dialing nodes and running command batches.

use std::io::{BufRead, BufReader};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use autok3s_types::SshCredentials;
use ssh2::{ExtendedData, Session};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, dispatcher, info, Span};

use crate::auth::{auth_methods, AuthMethod};
use crate::error::SshError;
use crate::protocol::{sudo_prefix, wrap_commands, PRIVILEGE_CHECK};
use crate::retry::{retry_with_backoff, Cancelled, RetryPolicy};
use crate::terminal::SshShell;

/// Where and how to dial a node.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub credentials: SshCredentials,
    /// Bound for TCP connect, handshake and authentication.
    pub connect_timeout: Duration,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, credentials: SshCredentials) -> Self {
        Self {
            host: host.into(),
            credentials,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.credentials.port())
    }
}

/// An authenticated SSH session to one node.
pub struct SshClient {
    session: Session,
    host: String,
    cancel: CancellationToken,
    sudo: OnceCell<&'static str>,
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("host", &self.host)
            .field("sudo", &self.sudo.get())
            .finish()
    }
}

impl SshClient {
    /// Dial `target`, retrying on `policy` until it succeeds, attempts run
    /// out or `cancel` fires.
    pub async fn connect(
        target: &SshTarget,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Self, SshError> {
        let methods = auth_methods(&target.credentials);
        if methods.is_empty() {
            return Err(SshError::NoAuthMethod {
                host: target.host.clone(),
            });
        }

        let session = retry_with_backoff(policy, "ssh_dial", cancel, || {
            let target = target.clone();
            let methods = methods.clone();
            async move { tokio::task::spawn_blocking(move || dial(&target, &methods)).await? }
        })
        .await?;

        info!(host = %target.host, user = %target.credentials.user(), "Connected to node");
        Ok(Self {
            session,
            host: target.host.clone(),
            cancel: cancel.clone(),
            sudo: OnceCell::new(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Privilege prefix for this connection, checked once and cached.
    pub async fn sudo(&self) -> Result<&'static str, SshError> {
        let prefix = self
            .sudo
            .get_or_try_init(|| async {
                let output = self.exec(PRIVILEGE_CHECK.to_string()).await?;
                let prefix = sudo_prefix(&output);
                debug!(host = %self.host, sudo = !prefix.is_empty(), "Detected remote privileges");
                Ok::<_, SshError>(prefix)
            })
            .await?;
        Ok(*prefix)
    }

    /// Run `commands` as one wrapped batch and return the combined output.
    ///
    /// Output lines are logged as they arrive under the `remote` target.
    /// A non-zero exit status is an error carrying the output.
    pub async fn run(&self, commands: &[String]) -> Result<String, SshError> {
        if commands.is_empty() {
            return Ok(String::new());
        }
        let sudo = self.sudo().await?;
        self.exec(wrap_commands(commands, sudo)).await
    }

    async fn exec(&self, command: String) -> Result<String, SshError> {
        let session = self.session.clone();
        let host = self.host.clone();

        // Re-enter the caller's dispatcher and span on the blocking thread
        // so remote output reaches per-cluster log files.
        let dispatch = dispatcher::get_default(|d| d.clone());
        let span = Span::current();

        let task = tokio::task::spawn_blocking(move || {
            dispatcher::with_default(&dispatch, || {
                span.in_scope(|| exec_blocking(&session, &host, &command))
            })
        });

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Cancelled.into()),
            result = task => result?,
        }
    }

    /// Hand the session over to an interactive shell.
    pub fn into_shell(self) -> SshShell {
        SshShell::new(self.host, self.session)
    }
}

fn dial(target: &SshTarget, methods: &[AuthMethod]) -> Result<Session, SshError> {
    let host = target.host.as_str();
    let connect_err = |source| SshError::Connect {
        host: host.to_string(),
        source,
    };

    let addr = target
        .endpoint()
        .to_socket_addrs()
        .map_err(connect_err)?
        .next()
        .ok_or_else(|| {
            connect_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "address resolved to nothing",
            ))
        })?;
    let tcp = TcpStream::connect_timeout(&addr, target.connect_timeout).map_err(connect_err)?;

    let mut session = Session::new().map_err(|e| SshError::protocol(host, e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(target.connect_timeout.as_millis().min(u32::MAX as u128) as u32);
    session.handshake().map_err(|e| SshError::protocol(host, e))?;

    let user = target.credentials.user();
    let mut last_err = None;
    for method in methods {
        match method.authenticate(&session, user, host) {
            Ok(()) => {
                debug!(host = %host, method = method.name(), "Authenticated");
                last_err = None;
                break;
            }
            Err(e) => {
                debug!(host = %host, method = method.name(), error = %e, "Auth method rejected");
                last_err = Some(e);
            }
        }
    }
    if let Some(e) = last_err {
        return Err(e);
    }

    // Installs can stay silent for minutes.
    session.set_timeout(0);
    Ok(session)
}

/// One channel per batch; dropping the channel closes it on every path.
fn exec_blocking(session: &Session, host: &str, command: &str) -> Result<String, SshError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| SshError::protocol(host, e))?;
    channel
        .handle_extended_data(ExtendedData::Merge)
        .map_err(|e| SshError::protocol(host, e))?;
    channel.exec(command).map_err(|e| SshError::protocol(host, e))?;

    let mut output = String::new();
    {
        let mut reader = BufReader::new(&mut channel);
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| SshError::io(host, e))?;
            if n == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            info!(target: "remote", host = %host, "{}", text);
            output.push_str(text);
            output.push('\n');
        }
    }

    channel.wait_close().map_err(|e| SshError::protocol(host, e))?;
    let status = channel
        .exit_status()
        .map_err(|e| SshError::protocol(host, e))?;
    if status != 0 {
        return Err(SshError::CommandFailed {
            host: host.to_string(),
            status,
            output,
        });
    }
    Ok(output)
}
