//! Cargo-style progress output for chunksync
//!
//! Displays progress in the familiar cargo format:
//! ```text
//!    Planning 952 files (67.44 GiB) from backup-box
//!    Fetching [======>                  ] 12.10 GiB/67.44 GiB media/2024/clip.mov
//!     Removed 3 stale files, 1 directory
//!      Synced 952 files (4 fetched, 1 resumed, 947 skipped), 12.10 GiB in 3.2s
//! ```

use std::io::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, OnceLock};
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;

use chunksync_core::{SyncAction, SyncEvent, SyncObserver, SyncReport};

/// Shared draw target so log lines and bars do not tear each other
static MULTI: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const PLANNING: &str = "Planning";
    const FETCHING: &str = "Fetching";
    const REMOVED: &str = "Removed";
    const SYNCED: &str = "Synced";
    const WARNING: &str = "Warning";
}

/// Print a cargo-style status line
fn print_status(status: &str, message: &str, style: &console::Style) {
    MULTI.suspend(|| {
        let mut term = console::Term::stderr();
        let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
    });
}

fn green() -> console::Style {
    console::Style::new().green().bold()
}

fn size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

/// `tracing` writer that prints above any live progress bars
#[derive(Clone, Copy, Default)]
pub struct ProgressWriter;

impl io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        MULTI.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Progress tracker for the sync operation
pub struct SyncProgress {
    start: Instant,
    source: String,
    bar: OnceLock<ProgressBar>,
    /// Bytes of files already settled (installed or skipped)
    settled: AtomicU64,
}

impl SyncProgress {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            source: source.into(),
            bar: OnceLock::new(),
            settled: AtomicU64::new(0),
        }
    }

    fn byte_bar(total_bytes: u64) -> ProgressBar {
        let pb = MULTI.add(ProgressBar::new(total_bytes));
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} {msg:>10} [{bar:25.cyan/dim}] {binary_bytes}/{binary_total_bytes} {prefix:.dim}",
        ) {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(Status::FETCHING);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Move the bar to the end of a file that needs no more bytes
    fn settle(&self, bytes: u64) {
        let settled = self.settled.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if let Some(bar) = self.bar.get() {
            bar.set_position(settled);
        }
    }

    /// Show final summary
    pub fn finish(&self, report: &SyncReport) {
        if let Some(bar) = self.bar.get() {
            bar.finish_and_clear();
        }

        let cleanup = &report.cleanup;
        if !cleanup.removed_files.is_empty() || !cleanup.removed_dirs.is_empty() {
            print_status(
                Status::REMOVED,
                &format!(
                    "{}, {}",
                    plural(cleanup.removed_files.len(), "stale file", "stale files"),
                    plural(cleanup.removed_dirs.len(), "directory", "directories"),
                ),
                &green(),
            );
        }
        let yellow = console::Style::new().yellow().bold();
        for failure in &cleanup.failures {
            print_status(
                Status::WARNING,
                &format!("could not remove {}: {}", failure.path.display(), failure.error),
                &yellow,
            );
        }

        let elapsed = self.start.elapsed();
        let elapsed_str = if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        };
        let files = report.fetched + report.resumed + report.skipped;
        print_status(
            Status::SYNCED,
            &format!(
                "{} ({} fetched, {} resumed, {} skipped), {} in {elapsed_str}",
                plural(files, "file", "files"),
                report.fetched,
                report.resumed,
                report.skipped,
                size(report.bytes_fetched),
            ),
            &green(),
        );
    }
}

impl SyncObserver for SyncProgress {
    fn on_event(&self, event: &SyncEvent<'_>) {
        match event {
            SyncEvent::Planned { files, bytes } => {
                print_status(
                    Status::PLANNING,
                    &format!(
                        "{} ({}) from {}",
                        plural(*files, "file", "files"),
                        size(*bytes),
                        self.source
                    ),
                    &green(),
                );
                let _ = self.bar.set(Self::byte_bar(*bytes));
            }
            SyncEvent::FileStarted { entry, action } => {
                if *action == SyncAction::Skip {
                    self.settle(entry.size);
                } else if let Some(bar) = self.bar.get() {
                    bar.set_prefix(entry.name.clone());
                }
            }
            SyncEvent::BlockWritten { bytes } => {
                if let Some(bar) = self.bar.get() {
                    bar.inc(*bytes);
                }
            }
            SyncEvent::FileInstalled { entry } => self.settle(entry.size),
        }
    }
}
