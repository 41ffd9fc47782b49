//! chunksync-agent: Remote peer for chunksync
//!
//! Installed on the remote host and run once per request over an SSH
//! remote command. Responses go to stdout; diagnostics go to stderr and
//! any failure exits non-zero.

use std::io::BufWriter;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use chunksync_core::config::LOG_ENV;
use chunksync_core::protocol::serve;
use chunksync_core::{Budget, Request};

#[derive(Parser)]
#[command(name = "chunksync-agent")]
#[command(about = "Remote peer for chunksync file synchronization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List files under the given paths, newest first, within a byte budget
    List {
        /// Byte ceiling for the whole listing, or -1 for no limit
        #[arg(allow_hyphen_values = true)]
        budget: Budget,
        /// Absolute remote paths enumerated together
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Print the block fingerprint of one file
    Hash { path: String },
    /// Write one raw block of a file to stdout
    Get { index: u64, path: String },
    /// Print version and exit
    Version,
}

impl From<Commands> for Request {
    fn from(command: Commands) -> Self {
        match command {
            Commands::List { budget, paths } => Self::List { budget, paths },
            Commands::Hash { path } => Self::Hash { path },
            Commands::Get { index, path } => Self::Get { index, path },
            Commands::Version => Self::Version,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    // stdout carries the response, so logs must stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let request = Request::from(cli.command);
    tracing::debug!("Serving {}", request.verb());

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    serve(&request, &mut out)?;

    Ok(())
}
