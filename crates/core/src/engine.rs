//! Reconciliation engine: decides what to fetch, verifies every block, installs atomically
//!
//! Files are fetched into a hidden sibling (`.chunksync-<name>`) which doubles as the
//! resume checkpoint. A later run hashes whatever that file holds against the
//! remote fingerprint, truncates at the first bad block and fetches from there.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt as _, stream};
use tracing::{Instrument as _, debug, info};

use crate::block::verified_prefix;
use crate::channel::RemoteChannel;
use crate::config::{SizeMatchPolicy, SyncConfig};
use crate::error::{Result, SyncError};
use crate::gc::{CleanupReport, GarbageCollector};
use crate::hash::{ContentHash, block_count};
use crate::mapping::{SyncMapping, map_entries};
use crate::protocol::{Request, decode_fingerprint, decode_listing};
use crate::scan::{Budget, FileEntry};

/// Per-file decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Nothing at the destination yet
    Fetch,
    /// Destination exists with different (or, under verification, wrong) content
    Resume,
    /// Destination is considered in sync
    Skip,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Resume => "resume",
            Self::Skip => "skip",
        })
    }
}

/// Progress notifications emitted during a sync
#[derive(Debug)]
pub enum SyncEvent<'a> {
    /// The remote listing has been mapped
    Planned { files: usize, bytes: u64 },
    /// A file has been classified
    FileStarted {
        entry: &'a FileEntry,
        action: SyncAction,
    },
    /// A verified block was written
    BlockWritten { bytes: u64 },
    /// A file was installed at its destination
    FileInstalled { entry: &'a FileEntry },
}

/// Receives [`SyncEvent`]s; the default implementation ignores them
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, _event: &SyncEvent<'_>) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub size_match: SizeMatchPolicy,
    /// Block fetches in flight per file
    pub parallelism: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            size_match: SizeMatchPolicy::Trust,
            parallelism: 1,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            size_match: config.size_match,
            parallelism: config.parallelism,
        }
    }
}

/// Summary of a completed sync
#[derive(Debug, Default)]
pub struct SyncReport {
    pub fetched: usize,
    pub resumed: usize,
    pub skipped: usize,
    pub blocks_fetched: u64,
    pub bytes_fetched: u64,
    pub cleanup: CleanupReport,
}

/// Name prefix of an in-progress download. It starts with the hidden marker,
/// so partial files never show up in a listing.
pub const PARTIAL_PREFIX: &str = ".chunksync-";

/// In-progress sibling of `dest`: same directory, base name prefixed with [`PARTIAL_PREFIX`]
#[must_use]
pub fn partial_path(dest: &Path) -> Option<PathBuf> {
    let name = dest.file_name()?.to_str()?;
    Some(dest.with_file_name(format!("{PARTIAL_PREFIX}{name}")))
}

/// Destination that the partial file at `path` is being assembled for
#[must_use]
pub fn partial_target(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?.strip_prefix(PARTIAL_PREFIX)?;
    (!name.is_empty()).then(|| path.with_file_name(name))
}

/// One-way sync from a remote peer into local roots
pub struct SyncEngine<C> {
    channel: C,
    options: SyncOptions,
    observer: Arc<dyn SyncObserver>,
}

impl<C: RemoteChannel> SyncEngine<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            options: SyncOptions::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Enumerate every remote root jointly and map the result onto local paths.
    ///
    /// # Errors
    /// Returns channel or protocol errors from the `list` call
    pub async fn list(&self, budget: Budget, mappings: &[SyncMapping]) -> Result<Vec<FileEntry>> {
        if mappings.is_empty() {
            return Err(SyncError::config("no roots to sync"));
        }

        let request = Request::List {
            budget,
            paths: mappings.iter().map(|m| m.remote_root.clone()).collect(),
        };
        let body = self.channel.execute(&request).await?;
        let listing = decode_listing(&body)?;
        debug!("Remote listed {} files", listing.files.len());

        Ok(map_entries(mappings, listing.files))
    }

    /// Fetch the remote fingerprint of one file
    ///
    /// # Errors
    /// Returns channel or protocol errors from the `hash` call
    pub async fn fingerprint(&self, name: &str) -> Result<FileEntry> {
        let body = self
            .channel
            .execute(&Request::Hash {
                path: name.to_string(),
            })
            .await?;
        decode_fingerprint(&body)
    }

    /// Fetch one raw, unverified block
    ///
    /// # Errors
    /// Returns channel errors from the `get` call
    pub async fn fetch_block(&self, name: &str, index: u64) -> Result<Bytes> {
        self.channel
            .execute(&Request::Get {
                index,
                path: name.to_string(),
            })
            .await
    }

    /// Run a full sync: list, reconcile every file, then sweep stale local paths.
    ///
    /// # Errors
    /// Any channel, integrity, traversal or I/O failure aborts the sync.
    /// Cleanup failures are only reported.
    pub async fn sync(&self, budget: Budget, mappings: &[SyncMapping]) -> Result<SyncReport> {
        let entries = self.list(budget, mappings).await?;
        let total: u64 = entries.iter().map(|e| e.size).sum();
        info!("{} files selected ({total} bytes)", entries.len());
        self.observer.on_event(&SyncEvent::Planned {
            files: entries.len(),
            bytes: total,
        });

        let mut report = SyncReport::default();
        for entry in &entries {
            let span = tracing::info_span!("file", name = %entry.name);
            self.reconcile(entry, &mut report).instrument(span).await?;
        }

        let roots: Vec<PathBuf> = mappings.iter().map(|m| m.local_root.clone()).collect();
        report.cleanup = GarbageCollector::new(&entries).clean(&roots);

        Ok(report)
    }

    async fn reconcile(&self, entry: &FileEntry, report: &mut SyncReport) -> Result<()> {
        let dest = destination(entry)?;
        let (action, fingerprint) = self.decide(entry, dest).await?;
        self.observer
            .on_event(&SyncEvent::FileStarted { entry, action });

        match action {
            SyncAction::Skip => {
                info!("Skipping {} (already in sync)", dest.display());
                report.skipped += 1;
                return Ok(());
            }
            SyncAction::Fetch => {
                info!("Fetching {} -> {}", entry.name, dest.display());
                report.fetched += 1;
            }
            SyncAction::Resume => {
                info!("Resuming {} -> {}", entry.name, dest.display());
                report.resumed += 1;
            }
        }

        let (blocks, bytes) = self.transfer(entry, dest, action, fingerprint).await?;
        report.blocks_fetched += blocks;
        report.bytes_fetched += bytes;
        self.observer.on_event(&SyncEvent::FileInstalled { entry });
        Ok(())
    }

    /// Classify one entry. Under [`SizeMatchPolicy::Verify`] a size match costs a
    /// fingerprint, which is handed back for reuse.
    async fn decide(
        &self,
        entry: &FileEntry,
        dest: &Path,
    ) -> Result<(SyncAction, Option<FileEntry>)> {
        let local_size = match std::fs::metadata(dest) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((SyncAction::Fetch, None)),
            Err(e) => return Err(SyncError::io(dest, e)),
        };

        if local_size != entry.size {
            debug!("Size differs: remote {} local {local_size}", entry.size);
            return Ok((SyncAction::Resume, None));
        }
        if entry.size == 0 || self.options.size_match == SizeMatchPolicy::Trust {
            return Ok((SyncAction::Skip, None));
        }

        let fingerprint = self.fingerprint(&entry.name).await?;
        let expected = fingerprint.block_hashes.as_deref().unwrap_or_default();
        let mut file = File::open(dest).map_err(|e| SyncError::io(dest, e))?;
        let (blocks, bytes) =
            verified_prefix(&mut file, expected).map_err(|e| SyncError::io(dest, e))?;

        if blocks == expected.len() && bytes == fingerprint.size && bytes == local_size {
            Ok((SyncAction::Skip, None))
        } else {
            info!("Content differs from block {blocks}, repairing");
            Ok((SyncAction::Resume, Some(fingerprint)))
        }
    }

    /// Bring the partial file up to the remote fingerprint and rename it over `dest`.
    /// Returns the number of blocks and bytes fetched.
    async fn transfer(
        &self,
        entry: &FileEntry,
        dest: &Path,
        action: SyncAction,
        fingerprint: Option<FileEntry>,
    ) -> Result<(u64, u64)> {
        let fingerprint = match fingerprint {
            Some(fingerprint) => fingerprint,
            None => self.fingerprint(&entry.name).await?,
        };
        let expected = fingerprint.block_hashes.as_deref().unwrap_or_default();
        if expected.len() as u64 != block_count(fingerprint.size) {
            return Err(SyncError::protocol(format!(
                "fingerprint for {} lists {} blocks, {} bytes needs {}",
                entry.name,
                expected.len(),
                fingerprint.size,
                block_count(fingerprint.size)
            )));
        }

        let partial = partial_path(dest).ok_or_else(|| {
            SyncError::config(format!("destination {} has no file name", dest.display()))
        })?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        // A resume without a checkpoint starts from the stale destination itself.
        if action == SyncAction::Resume && !partial.exists() {
            std::fs::copy(dest, &partial).map_err(|e| SyncError::io(&partial, e))?;
        }

        let io_err = |e: std::io::Error| SyncError::io(&partial, e);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&partial)
            .map_err(io_err)?;

        let (verified, mut offset) = verified_prefix(&mut file, expected).map_err(io_err)?;
        file.set_len(offset).map_err(io_err)?;
        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        if verified > 0 {
            info!(
                "Reusing {verified}/{} verified blocks ({offset} bytes)",
                expected.len()
            );
        }

        let name = entry.name.as_str();
        let mut blocks = stream::iter(verified..expected.len())
            .map(move |index| async move {
                let data = self.fetch_block(name, index as u64).await?;
                let actual = ContentHash::from_bytes(&data);
                if actual != expected[index] {
                    return Err(SyncError::Integrity {
                        path: name.to_string(),
                        block: index as u64,
                        expected: expected[index],
                        actual,
                    });
                }
                Ok(data)
            })
            .buffered(self.options.parallelism.max(1));

        let mut fetched = 0u64;
        let mut fetched_bytes = 0u64;
        while let Some(data) = blocks.next().await {
            let data = data?;
            file.write_all(&data).map_err(io_err)?;
            offset += data.len() as u64;
            fetched += 1;
            fetched_bytes += data.len() as u64;
            self.observer.on_event(&SyncEvent::BlockWritten {
                bytes: data.len() as u64,
            });
        }

        if offset != fingerprint.size {
            return Err(SyncError::SizeMismatch {
                path: entry.name.clone(),
                expected: fingerprint.size,
                actual: offset,
            });
        }

        file.sync_all().map_err(io_err)?;
        drop(file);

        let mtime = filetime::FileTime::from_system_time(fingerprint.modified);
        filetime::set_file_mtime(&partial, mtime).map_err(io_err)?;
        std::fs::rename(&partial, dest).map_err(|e| SyncError::io(dest, e))?;
        debug!("Installed {} ({fetched} blocks fetched)", dest.display());

        Ok((fetched, fetched_bytes))
    }
}

fn destination(entry: &FileEntry) -> Result<&Path> {
    entry
        .local_path
        .as_deref()
        .ok_or_else(|| SyncError::config(format!("{} has no local path", entry.name)))
}
