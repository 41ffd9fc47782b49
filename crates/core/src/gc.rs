//! Removal of local files and directories the remote no longer lists

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::engine::partial_target;
use crate::scan::{FileEntry, is_hidden};

/// A stale path that could not be removed
#[derive(Debug)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a cleanup pass. Failures never abort the sync.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed_files: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &Path, error: impl ToString) {
        let error = error.to_string();
        warn!("Could not remove {}: {error}", path.display());
        self.failures.push(CleanupFailure {
            path: path.to_path_buf(),
            error,
        });
    }
}

/// Hidden entries are left alone, except partial downloads
fn is_partial(entry: &ignore::DirEntry) -> bool {
    entry.file_type().is_some_and(|t| t.is_file()) && partial_target(entry.path()).is_some()
}

/// Sweeps local roots, keeping exactly the given entries
pub struct GarbageCollector {
    keep_files: HashSet<PathBuf>,
    keep_dirs: HashSet<PathBuf>,
}

impl GarbageCollector {
    /// Build the keep set from entries whose `local_path` has been mapped
    #[must_use]
    pub fn new(keep: &[FileEntry]) -> Self {
        let keep_files: HashSet<PathBuf> =
            keep.iter().filter_map(|e| e.local_path.clone()).collect();
        let keep_dirs = keep_files
            .iter()
            .flat_map(|path| path.ancestors().skip(1).map(Path::to_path_buf))
            .collect();
        Self {
            keep_files,
            keep_dirs,
        }
    }

    /// Stale paths under `roots`, children before their parents.
    ///
    /// Hidden entries are never considered. A directory is stale when no kept
    /// file lies beneath it; anything else is stale unless it is kept exactly.
    pub fn stale_paths(&self, roots: &[PathBuf], report: &mut CleanupReport) -> Vec<(PathBuf, bool)> {
        let mut seen = HashSet::new();
        let mut stale = Vec::new();

        for root in roots {
            if !root.exists() {
                debug!("Local root {} does not exist, nothing to clean", root.display());
                continue;
            }

            let walker = WalkBuilder::new(root)
                .standard_filters(false)
                .follow_links(false)
                .filter_entry(|e| !is_hidden(e.file_name()) || is_partial(e))
                .build();

            for result in walker {
                let entry = match result {
                    Ok(entry) => entry,
                    Err(e) => {
                        report.fail(root, e);
                        continue;
                    }
                };
                if entry.depth() == 0 {
                    continue;
                }

                let path = entry.path();
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                let keep = if is_dir {
                    self.keep_dirs.contains(path)
                } else {
                    self.keep_files.contains(path)
                        || partial_target(path).is_some_and(|target| self.keep_files.contains(&target))
                };
                if !keep && seen.insert(path.to_path_buf()) {
                    stale.push((path.to_path_buf(), is_dir));
                }
            }
        }

        // Deepest first, so directories are emptied before their own removal.
        stale.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
        stale
    }

    /// Remove every stale path under `roots`
    pub fn clean(&self, roots: &[PathBuf]) -> CleanupReport {
        let mut report = CleanupReport::default();

        for (path, is_dir) in self.stale_paths(roots, &mut report) {
            let result = if is_dir {
                std::fs::remove_dir(&path)
            } else {
                std::fs::remove_file(&path)
            };

            match result {
                Ok(()) if is_dir => {
                    info!("Removed stale directory {}", path.display());
                    report.removed_dirs.push(path);
                }
                Ok(()) => {
                    info!("Removed stale file {}", path.display());
                    report.removed_files.push(path);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => report.fail(&path, e),
            }
        }

        report
    }
}
