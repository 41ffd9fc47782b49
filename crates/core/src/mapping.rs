//! Local/remote root pairs and the mapping of remote names onto local paths

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SyncError};
use crate::scan::FileEntry;

/// A configured `(localRoot, remoteRoot)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMapping {
    /// Absolute destination root
    pub local_root: PathBuf,
    /// Absolute remote source root, always ending in `/`
    pub remote_root: String,
}

impl SyncMapping {
    /// Build a mapping, normalising the remote root to a trailing separator.
    ///
    /// # Errors
    /// Returns a config error if the remote root is not absolute or the local
    /// root cannot be made absolute
    pub fn new(local_root: impl AsRef<Path>, remote_root: &str) -> Result<Self> {
        let local_root = local_root.as_ref();
        let local_root =
            std::path::absolute(local_root).map_err(|e| SyncError::io(local_root, e))?;

        if !remote_root.starts_with('/') {
            return Err(SyncError::config(format!(
                "remote root `{remote_root}` must be an absolute path"
            )));
        }
        let mut remote_root = remote_root.to_string();
        if !remote_root.ends_with('/') {
            remote_root.push('/');
        }

        Ok(Self {
            local_root,
            remote_root,
        })
    }

    /// Destination for a remote name under this mapping, if it falls under the remote root.
    ///
    /// Names whose remainder contains empty, `.` or `..` components are refused
    /// so a listing can never address a path outside the local root.
    #[must_use]
    pub fn local_path_for(&self, name: &str) -> Option<PathBuf> {
        let relative = name.strip_prefix(&self.remote_root)?;
        if relative.is_empty() {
            return None;
        }

        let mut path = self.local_root.clone();
        for part in relative.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return None;
            }
            path.push(part);
        }
        Some(path)
    }
}

impl FromStr for SyncMapping {
    type Err = SyncError;

    /// Parse `localPath[:remotePath]`. Without a remote part the remote root is
    /// the absolute form of the local path.
    fn from_str(root: &str) -> Result<Self> {
        match root.split_once(':') {
            Some((local, remote)) if !local.is_empty() && !remote.is_empty() => {
                Self::new(local, remote)
            }
            None if !root.is_empty() => {
                let local =
                    std::path::absolute(root).map_err(|e| SyncError::io(root, e))?;
                let remote = local
                    .to_str()
                    .ok_or_else(|| SyncError::config(format!("root `{root}` is not valid UTF-8")))?
                    .to_string();
                Self::new(&local, &remote)
            }
            _ => Err(SyncError::config(format!(
                "invalid root `{root}`, expected localPath[:remotePath]"
            ))),
        }
    }
}

/// Assign `local_path` to every entry using the first mapping whose remote
/// root prefixes its name. Entries no mapping claims are dropped.
#[must_use]
pub fn map_entries(mappings: &[SyncMapping], entries: Vec<FileEntry>) -> Vec<FileEntry> {
    entries
        .into_iter()
        .filter_map(|mut entry| {
            let Some(mapping) = mappings
                .iter()
                .find(|m| entry.name.starts_with(&m.remote_root))
            else {
                tracing::debug!("No mapping for {}, ignoring", entry.name);
                return None;
            };

            match mapping.local_path_for(&entry.name) {
                Some(path) => {
                    entry.local_path = Some(path);
                    Some(entry)
                }
                None => {
                    tracing::warn!("Refusing unsafe remote name {}", entry.name);
                    None
                }
            }
        })
        .collect()
}
