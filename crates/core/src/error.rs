//! Error types for sync operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::hash::ContentHash;

/// Errors that abort a sync.
///
/// Every variant is fatal to the run that produced it. Cleanup failures are
/// not represented here; they are collected in a
/// [`CleanupReport`](crate::gc::CleanupReport) instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote command channel could not run a command, or the command failed.
    #[error("channel failure running `{command}`: {message}")]
    Channel { command: String, message: String },

    /// A fetched block did not hash to the value the fingerprint promised.
    #[error("integrity failure in {path} at block {block}: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        block: u64,
        expected: ContentHash,
        actual: ContentHash,
    },

    /// A fetched file did not add up to the size the fingerprint promised.
    #[error("integrity failure in {path}: expected {expected} bytes, assembled {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// Enumeration could not visit part of a tree.
    #[error("traversal failed at {path}: {message}")]
    Traversal { path: PathBuf, message: String },

    /// Local filesystem I/O failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A request or response did not follow the wire format.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Invalid configuration or command-line input.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl SyncError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn channel(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this failure came from content verification.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::SizeMismatch { .. })
    }
}

/// Result alias used throughout the engine.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
