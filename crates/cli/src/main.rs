//! chunksync: One-way, content-verified file sync over SSH
//!
//! Pulls the most recently modified files from a remote host into local
//! directories:
//! - Recency-ordered selection under a byte budget
//! - BLAKE3 block fingerprints, every fetched block verified
//! - Resumable transfers with atomic installs
//! - Stale local files removed after each run

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, ValueEnum, builder::Styles};
use color_eyre::Result;
use tracing::{debug, info};

use chunksync_core::{
    Budget, Listing, Scanner, SizeMatchPolicy, SyncConfig, SyncEngine, SyncMapping, SyncOptions,
};
use chunksync_transport::{SshDestination, SshTransport};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "chunksync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "One-way, content-verified file sync over SSH")]
#[command(long_about = r#"
chunksync pulls the newest files from a remote host into local directories.

Features:
  • Byte budget      - keeps only the most recent files that fit
  • Verified blocks  - every 64 KiB block checked against its BLAKE3 hash
  • Resumable        - interrupted transfers continue where they stopped
  • Exact mirror     - stale local files are removed after each run

Examples:
  chunksync sync user@host ./media:/srv/media            Mirror one directory
  chunksync sync host:2222 /data --budget-gb 500          Newest 500 GiB only
  chunksync scan /srv/media --budget-gb 10 --format json  Preview a selection
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Byte ceiling flags shared by `sync` and `scan`
#[derive(clap::Args, Debug, Default)]
struct BudgetArgs {
    /// Keep only the newest files fitting in this many GiB
    #[arg(long, conflicts_with = "budget_bytes")]
    budget_gb: Option<u64>,

    /// Keep only the newest files fitting in this many bytes
    #[arg(long)]
    budget_bytes: Option<u64>,
}

impl BudgetArgs {
    fn budget(&self) -> Budget {
        match (self.budget_gb, self.budget_bytes) {
            (Some(gb), _) => Budget::from_gigabytes(gb),
            (None, Some(bytes)) => Budget::Bytes(bytes),
            (None, None) => Budget::Unbounded,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ScanFormat {
    Json,
    Summary,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync remote directories into local ones
    Sync {
        /// Remote host ([user@]host[:port])
        remote: String,

        /// Directories to sync (localPath[:remotePath])
        #[arg(required = true)]
        roots: Vec<String>,

        #[command(flatten)]
        budget: BudgetArgs,

        /// SSH port
        #[arg(short, long)]
        port: Option<u16>,

        /// Agent program on the remote host
        #[arg(long)]
        program: Option<String>,

        /// Per-command timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Block fetches in flight per file
        #[arg(short = 'j', long)]
        parallelism: Option<usize>,

        /// Hash files whose size already matches instead of trusting them
        #[arg(long)]
        verify_size_match: bool,

        /// Config file (defaults to ./.chunksync.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Enumerate local directories the way the remote agent would
    Scan {
        /// Directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        budget: BudgetArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ScanFormat::Summary)]
        format: ScanFormat,
    },

    /// Show version and build info
    Version,
}

/// Flag overrides applied on top of the config file
#[derive(Debug, Default)]
struct Overrides {
    port: Option<u16>,
    program: Option<String>,
    timeout: Option<u64>,
    parallelism: Option<usize>,
    verify_size_match: bool,
}

impl Overrides {
    fn apply(self, config: &mut SyncConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(program) = self.program {
            config.remote_program = program;
        }
        if let Some(timeout) = self.timeout {
            config.command_timeout_secs = timeout;
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if self.verify_size_match {
            config.size_match = SizeMatchPolicy::Verify;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let session = debug_log::init(cli.verbose);
    debug!("Session {} logging to {}", session.id, session.log_path.display());

    match cli.command {
        Commands::Version => {
            eprintln!("chunksync {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Scan {
            paths,
            budget,
            format,
        } => {
            scan_command(&paths, budget.budget(), format)?;
        }
        Commands::Sync {
            remote,
            roots,
            budget,
            port,
            program,
            timeout,
            parallelism,
            verify_size_match,
            config,
        } => {
            let overrides = Overrides {
                port,
                program,
                timeout,
                parallelism,
                verify_size_match,
            };
            let config = load_config(config.as_deref(), overrides)?;
            sync_command(&remote, &roots, budget.budget(), &config).await?;
        }
    }

    drop(session);
    Ok(())
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<SyncConfig> {
    let mut config = match path {
        Some(path) => SyncConfig::load_file(path)?,
        None => SyncConfig::load(&std::env::current_dir()?)?,
    };
    overrides.apply(&mut config);
    config.validate()?;
    debug!("Effective config: {config:?}");
    Ok(config)
}

fn scan_command(paths: &[PathBuf], budget: Budget, format: ScanFormat) -> Result<()> {
    info!("Scanning {} roots (budget {budget})...", paths.len());

    let files = Scanner::new(paths).budget(budget).scan()?;

    match format {
        ScanFormat::Json => {
            let json = serde_json::to_string_pretty(&Listing { files })?;
            println!("{json}");
        }
        ScanFormat::Summary => {
            eprintln!("Files: {}", files.len());
            let total_size: u64 = files.iter().map(|f| f.size).sum();
            eprintln!(
                "Total size: {}",
                humansize::format_size(total_size, humansize::BINARY)
            );

            if files.len() <= 20 {
                eprintln!("\nFiles (newest first):");
                for entry in &files {
                    eprintln!("  {} ({} bytes)", entry.name, entry.size);
                }
            }
        }
    }

    Ok(())
}

async fn sync_command(
    remote: &str,
    roots: &[String],
    budget: Budget,
    config: &SyncConfig,
) -> Result<()> {
    let destination: SshDestination = remote.parse()?;
    let mappings = roots
        .iter()
        .map(|root| root.parse::<SyncMapping>())
        .collect::<Result<Vec<_>, _>>()?;

    for mapping in &mappings {
        info!(
            "Syncing {destination}:{} -> {}",
            mapping.remote_root,
            mapping.local_root.display()
        );
    }

    let transport = SshTransport::connect(destination.clone(), config).await?;
    let progress = Arc::new(progress::SyncProgress::new(destination.to_string()));
    let engine = SyncEngine::new(transport)
        .with_options(SyncOptions::from(config))
        .with_observer(progress.clone());

    let report = engine.sync(budget, &mappings).await?;
    progress.finish(&report);

    Ok(())
}
