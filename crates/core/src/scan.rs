//! Directory enumeration with recency-ordered size budgets

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::hash::ContentHash;

/// Leading character that marks a file or directory as hidden.
pub const HIDDEN_MARKER: char = '.';

/// Whether a single path component is hidden.
#[must_use]
pub fn is_hidden(name: &OsStr) -> bool {
    name.to_str()
        .is_some_and(|name| name.starts_with(HIDDEN_MARKER))
}

/// Metadata for a single discovered file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Absolute, slash-separated path on the side that produced the entry
    pub name: String,
    /// Destination path, filled in by the engine; never transmitted
    #[serde(skip)]
    pub local_path: Option<PathBuf>,
    /// Modification time, used for ordering only
    #[serde(rename = "modTime", with = "mod_time")]
    pub modified: SystemTime,
    /// File size in bytes
    pub size: u64,
    /// Per-block hashes, present only on fingerprint results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hashes: Option<Vec<ContentHash>>,
}

impl FileEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, modified: SystemTime, size: u64) -> Self {
        Self {
            name: name.into(),
            local_path: None,
            modified,
            size,
            block_hashes: None,
        }
    }
}

/// `modTime` on the wire: signed seconds plus nanoseconds from the Unix epoch,
/// so files dated before 1970 still serialize.
mod mod_time {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use filetime::FileTime;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct UnixTime {
        secs: i64,
        nanos: u32,
    }

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let time = FileTime::from_system_time(*time);
        UnixTime {
            secs: time.unix_seconds(),
            nanos: time.nanoseconds(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let UnixTime { secs, nanos } = UnixTime::deserialize(deserializer)?;
        if nanos >= 1_000_000_000 {
            return Err(D::Error::custom(format!("modTime nanos {nanos} out of range")));
        }

        let whole = Duration::from_secs(secs.unsigned_abs());
        let base = if secs >= 0 {
            UNIX_EPOCH.checked_add(whole)
        } else {
            UNIX_EPOCH.checked_sub(whole)
        };
        base.and_then(|t| t.checked_add(Duration::from_nanos(u64::from(nanos))))
            .ok_or_else(|| D::Error::custom(format!("modTime {secs}s not representable")))
    }
}

/// Byte ceiling applied to an enumeration, most recently modified files first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Budget {
    #[default]
    Unbounded,
    Bytes(u64),
}

impl Budget {
    pub const GIGABYTE: u64 = 1024 * 1024 * 1024;

    #[must_use]
    pub fn from_gigabytes(gigabytes: u64) -> Self {
        Self::Bytes(gigabytes.saturating_mul(Self::GIGABYTE))
    }

    /// Keep the longest prefix of `entries` whose running size total stays
    /// strictly below the ceiling.
    ///
    /// `entries` must already be in recency order. The first entry that does
    /// not fit ends the selection, so older files never backfill the budget.
    #[must_use]
    pub fn select(self, entries: Vec<FileEntry>) -> Vec<FileEntry> {
        let Self::Bytes(ceiling) = self else {
            return entries;
        };

        let mut total = 0u64;
        entries
            .into_iter()
            .take_while(|entry| {
                total = total.saturating_add(entry.size);
                total < ceiling
            })
            .collect()
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => f.write_str("-1"),
            Self::Bytes(bytes) => write!(f, "{bytes}"),
        }
    }
}

impl FromStr for Budget {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "-1" {
            return Ok(Self::Unbounded);
        }
        s.parse()
            .map(Self::Bytes)
            .map_err(|_| SyncError::protocol(format!("invalid budget `{s}`")))
    }
}

/// Enumerates one or more roots into a single recency-ordered, budgeted list
pub struct Scanner {
    roots: Vec<PathBuf>,
    budget: Budget,
}

impl Scanner {
    #[must_use]
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            budget: Budget::Unbounded,
        }
    }

    /// Apply a byte budget across all roots jointly
    #[must_use]
    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Hidden directories are pruned, hidden files skipped. The root itself is
    /// never filtered, whatever its name.
    fn walk_builder(root: &Path) -> WalkBuilder {
        let mut builder = WalkBuilder::new(root);
        builder
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|e| !is_hidden(e.file_name()));
        builder
    }

    /// Walk every root and return the selected entries, newest first.
    ///
    /// # Errors
    /// Any traversal or metadata error aborts the whole enumeration
    pub fn scan(&self) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for root in &self.roots {
            let root = std::path::absolute(root).map_err(|e| SyncError::io(root, e))?;

            for result in Self::walk_builder(&root).build() {
                let entry = result.map_err(|e| SyncError::Traversal {
                    path: root.clone(),
                    message: e.to_string(),
                })?;

                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }

                let path = entry.path();
                let traversal = |message: String| SyncError::Traversal {
                    path: path.to_path_buf(),
                    message,
                };
                let metadata = entry.metadata().map_err(|e| traversal(e.to_string()))?;
                let modified = metadata.modified().map_err(|e| traversal(e.to_string()))?;
                let name = path
                    .to_str()
                    .ok_or_else(|| traversal("path is not valid UTF-8".to_string()))?
                    .to_string();

                if seen.insert(name.clone()) {
                    entries.push(FileEntry::new(name, modified, metadata.len()));
                }
            }
        }

        // Stable, so equal timestamps keep walk order.
        entries.sort_by(|a, b| b.modified.cmp(&a.modified));

        let selected = self.budget.select(entries);
        tracing::debug!(
            "Enumerated {} files across {} roots",
            selected.len(),
            self.roots.len()
        );
        Ok(selected)
    }
}
