//! SSH transport implementation using the system ssh command
//!
//! Uses system SSH for reliability and to leverage user's existing SSH config.
//! Every request is a separate `ssh` invocation whose stdout is the response.

use std::fmt;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::{debug, info};

use chunksync_core::error::Result;
use chunksync_core::{RemoteChannel, Request, SyncConfig, SyncError};

/// Remote host as `[user@]host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshDestination {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl FromStr for SshDestination {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SyncError::config(format!("invalid destination `{s}`, expected [user@]host[:port]"));

        let (user, rest) = match s.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return Err(invalid()),
            None => (None, s),
        };
        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => (host, Some(port.parse().map_err(|_| invalid())?)),
            None => (rest, None),
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            user,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for SshDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// SSH transport for running agent verbs on a remote host
pub struct SshTransport {
    destination: SshDestination,
    /// Program and leading arguments, normally just `ssh`
    ssh_command: Vec<String>,
    port: u16,
    program: String,
    timeout: Duration,
    ssh_options: Vec<String>,
}

impl SshTransport {
    /// Build a transport without touching the network
    #[must_use]
    pub fn new(destination: SshDestination, config: &SyncConfig) -> Self {
        let port = destination.port.unwrap_or(config.port);
        Self {
            destination,
            ssh_command: config.ssh_command.clone(),
            port,
            program: config.remote_program.clone(),
            timeout: config.command_timeout(),
            ssh_options: config.ssh_options.clone(),
        }
    }

    /// Connect to a remote host via SSH and check the agent answers
    ///
    /// # Errors
    /// Returns a channel error if the host is unreachable, authentication
    /// fails or the agent program cannot be run
    pub async fn connect(destination: SshDestination, config: &SyncConfig) -> Result<Self> {
        let transport = Self::new(destination, config);
        info!("Connecting to {}", transport.destination);

        let version = transport.execute(&Request::Version).await?;
        info!(
            "Remote agent: {}",
            String::from_utf8_lossy(&version).trim()
        );
        Ok(transport)
    }

    /// Build SSH destination string
    fn ssh_dest(&self) -> String {
        match &self.destination.user {
            Some(user) => format!("{user}@{}", self.destination.host),
            None => self.destination.host.clone(),
        }
    }

    /// Arguments passed to `ssh` to run `command` remotely
    fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
        ];
        args.extend(self.ssh_options.iter().cloned());
        args.push(self.ssh_dest());
        args.push(command.to_string());
        args
    }

    /// Execute a command line on the remote host and collect its stdout
    ///
    /// # Errors
    /// Returns a channel error if ssh cannot be spawned, times out, or the
    /// remote command exits non-zero
    pub async fn run(&self, command: &str) -> Result<Bytes> {
        debug!("ssh {}: {command}", self.ssh_dest());

        let Some((program, leading)) = self.ssh_command.split_first() else {
            return Err(SyncError::channel(command, "no ssh command configured"));
        };
        let mut child = Command::new(program);
        child
            .args(leading)
            .args(self.ssh_args(command))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, child.output())
            .await
            .map_err(|_| {
                SyncError::channel(command, format!("timed out after {:?}", self.timeout))
            })?
            .map_err(|e| SyncError::channel(command, format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(SyncError::channel(
                command,
                format!(
                    "exit status {code}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(Bytes::from(output.stdout))
    }
}

#[async_trait]
impl RemoteChannel for SshTransport {
    async fn execute(&self, request: &Request) -> Result<Bytes> {
        self.run(&request.command_line(&self.program)).await
    }
}
