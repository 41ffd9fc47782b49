//! chunksync configuration file parsing (.chunksync.toml)

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SyncError};

/// What to do with a local file whose size already matches the remote one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeMatchPolicy {
    /// Treat it as in sync without looking at content
    #[default]
    Trust,
    /// Compare block hashes and repair any mismatch
    Verify,
}

/// chunksync configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Program invoked on the remote host for the list/hash/get verbs
    pub remote_program: String,

    /// SSH port
    pub port: u16,

    /// Per-command timeout in seconds
    pub command_timeout_secs: u64,

    /// Block fetches in flight per file (1 = strictly sequential)
    pub parallelism: usize,

    /// Policy for files whose sizes already match
    pub size_match: SizeMatchPolicy,

    /// Program (and leading arguments) used to reach the remote host
    pub ssh_command: Vec<String>,

    /// Extra arguments passed to `ssh`
    pub ssh_options: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_program: "chunksync-agent".to_string(),
            port: 22,
            command_timeout_secs: 300,
            parallelism: 1,
            size_match: SizeMatchPolicy::Trust,
            ssh_command: vec!["ssh".to_string()],
            ssh_options: Vec::new(),
        }
    }
}

/// Config file name
pub const CONFIG_FILE: &str = ".chunksync.toml";

/// Environment variable holding a `tracing` filter for both binaries
pub const LOG_ENV: &str = "CHUNKSYNC_LOG";

impl SyncConfig {
    /// Load config from a directory.
    ///
    /// Returns default config if .chunksync.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from an explicit file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SyncError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(SyncError::config("parallelism must be at least 1"));
        }
        if self.command_timeout_secs == 0 {
            return Err(SyncError::config("command_timeout_secs must be at least 1"));
        }
        if self.remote_program.trim().is_empty() {
            return Err(SyncError::config("remote_program must not be empty"));
        }
        if self.ssh_command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(SyncError::config("ssh_command must name a program"));
        }
        Ok(())
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
