//! Command-line protocol spoken to the remote peer
//!
//! Every request is one remote command invocation:
//!
//! ```text
//! list <budget-bytes|-1> <path>...   -> {"files":[FileEntry, ...]}
//! hash <path>                        -> FileEntry with blockHashes
//! get <block-index> <path>           -> raw block bytes, no framing
//! version                            -> peer name and version
//! ```
//!
//! Path arguments are single-quoted so the remote shell passes them through
//! verbatim, embedded spaces included.

use std::borrow::Cow;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::block::{fingerprint, read_block};
use crate::error::{Result, SyncError};
use crate::scan::{Budget, FileEntry, Scanner};

/// Verb names as they appear on the command line
pub mod verb {
    pub const LIST: &str = "list";
    pub const HASH: &str = "hash";
    pub const GET: &str = "get";
    pub const VERSION: &str = "version";
}

/// A single request to the remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Enumerate all paths jointly under one budget
    List { budget: Budget, paths: Vec<String> },
    /// Fingerprint one file
    Hash { path: String },
    /// Fetch one block of one file
    Get { index: u64, path: String },
    /// Report the peer version; used to probe the channel
    Version,
}

/// Response body of the `list` verb
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub files: Vec<FileEntry>,
}

impl Request {
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::List { .. } => verb::LIST,
            Self::Hash { .. } => verb::HASH,
            Self::Get { .. } => verb::GET,
            Self::Version => verb::VERSION,
        }
    }

    /// Arguments after the program name, unquoted
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.verb().to_string()];
        match self {
            Self::List { budget, paths } => {
                args.push(budget.to_string());
                args.extend(paths.iter().cloned());
            }
            Self::Hash { path } => args.push(path.clone()),
            Self::Get { index, path } => {
                args.push(index.to_string());
                args.push(path.clone());
            }
            Self::Version => {}
        }
        args
    }

    /// Parse arguments produced by [`Request::to_args`]
    ///
    /// # Errors
    /// Returns a protocol error for unknown verbs or malformed arguments
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        match args.as_slice() {
            [verb::LIST, budget, paths @ ..] if !paths.is_empty() => Ok(Self::List {
                budget: budget.parse()?,
                paths: paths.iter().map(ToString::to_string).collect(),
            }),
            [verb::HASH, path] => Ok(Self::Hash {
                path: (*path).to_string(),
            }),
            [verb::GET, index, path] => Ok(Self::Get {
                index: index
                    .parse()
                    .map_err(|_| SyncError::protocol(format!("invalid block index `{index}`")))?,
                path: (*path).to_string(),
            }),
            [verb::VERSION] => Ok(Self::Version),
            _ => Err(SyncError::protocol(format!(
                "malformed request: {}",
                args.join(" ")
            ))),
        }
    }

    /// Full shell command line invoking `program` with this request
    #[must_use]
    pub fn command_line(&self, program: &str) -> String {
        let mut line = program.to_string();
        for arg in self.to_args() {
            line.push(' ');
            line.push_str(&quote(&arg));
        }
        line
    }
}

/// Quote one argument for a POSIX shell.
///
/// Plain words pass through unchanged; anything else is wrapped in single
/// quotes with embedded single quotes spelled `'\''`.
#[must_use]
pub fn quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./,:=+@%".contains(&b));
    if plain {
        return Cow::Borrowed(arg);
    }
    Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
}

/// Execute `request` against the local filesystem and write its response.
///
/// # Errors
/// Returns an error if the verb fails or the response cannot be written
pub fn serve<W: Write>(request: &Request, out: &mut W) -> Result<()> {
    let write_err = |e: std::io::Error| SyncError::protocol(format!("writing response: {e}"));

    match request {
        Request::List { budget, paths } => {
            let files = Scanner::new(paths).budget(*budget).scan()?;
            serde_json::to_writer(&mut *out, &Listing { files })
                .map_err(|e| SyncError::protocol(e.to_string()))?;
        }
        Request::Hash { path } => {
            let entry = fingerprint(Path::new(path))?;
            serde_json::to_writer(&mut *out, &entry)
                .map_err(|e| SyncError::protocol(e.to_string()))?;
        }
        Request::Get { index, path } => {
            let block = read_block(Path::new(path), *index)?;
            out.write_all(&block).map_err(write_err)?;
        }
        Request::Version => {
            writeln!(out, "chunksync-agent {}", env!("CARGO_PKG_VERSION")).map_err(write_err)?;
        }
    }

    out.flush().map_err(write_err)
}

/// Decode a `list` response
///
/// # Errors
/// Returns a protocol error if the body is not a listing
pub fn decode_listing(body: &[u8]) -> Result<Listing> {
    serde_json::from_slice(body).map_err(|e| SyncError::protocol(format!("bad listing: {e}")))
}

/// Decode a `hash` response, checking it carries block hashes
///
/// # Errors
/// Returns a protocol error if the body is not a fingerprint
pub fn decode_fingerprint(body: &[u8]) -> Result<FileEntry> {
    let entry: FileEntry = serde_json::from_slice(body)
        .map_err(|e| SyncError::protocol(format!("bad fingerprint: {e}")))?;
    match &entry.block_hashes {
        Some(hashes) if !hashes.is_empty() => Ok(entry),
        _ => Err(SyncError::protocol(format!(
            "fingerprint for {} has no block hashes",
            entry.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{BLOCK_SIZE, ContentHash};
    use tempfile::TempDir;

    #[test]
    fn test_args_roundtrip() {
        let requests = [
            Request::List {
                budget: Budget::Bytes(6144),
                paths: vec!["/data/a b/".into(), "/srv/".into()],
            },
            Request::List {
                budget: Budget::Unbounded,
                paths: vec!["/x/".into()],
            },
            Request::Hash {
                path: "/data/it's here.txt".into(),
            },
            Request::Get {
                index: 42,
                path: "/data/f".into(),
            },
            Request::Version,
        ];
        for request in requests {
            assert_eq!(Request::from_args(&request.to_args()).unwrap(), request);
        }
    }

    #[test]
    fn test_from_args_rejects_malformed() {
        assert!(Request::from_args(&["list", "-1"]).is_err());
        assert!(Request::from_args(&["get", "x", "/f"]).is_err());
        assert!(Request::from_args(&["hash"]).is_err());
        assert!(Request::from_args(&["delete", "/f"]).is_err());
        assert!(Request::from_args::<&str>(&[]).is_err());
    }

    #[test]
    fn test_command_line_quotes_paths() {
        let request = Request::Get {
            index: 3,
            path: "/data/my file's.bin".into(),
        };
        assert_eq!(
            request.command_line("chunksync-agent"),
            r"chunksync-agent get 3 '/data/my file'\''s.bin'"
        );
        assert_eq!(
            Request::List {
                budget: Budget::Unbounded,
                paths: vec!["/srv/data/".into()],
            }
            .command_line("bin/agent"),
            "bin/agent list -1 /srv/data/"
        );
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain/path.txt"), "plain/path.txt");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("$HOME"), "'$HOME'");
        assert_eq!(quote("a b"), "'a b'");
    }

    #[test]
    fn test_serve_hash_and_get() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        let data: Vec<u8> = (0..BLOCK_SIZE + 7).map(|i| i as u8).collect();
        std::fs::write(&path, &data).unwrap();
        let path = path.to_str().unwrap().to_string();

        let mut out = Vec::new();
        serve(&Request::Hash { path: path.clone() }, &mut out).unwrap();
        let entry = decode_fingerprint(&out).unwrap();
        assert_eq!(entry.size, data.len() as u64);
        let hashes = entry.block_hashes.unwrap();
        assert_eq!(hashes.len(), 2);

        let mut out = Vec::new();
        serve(&Request::Get { index: 1, path }, &mut out).unwrap();
        assert_eq!(out, &data[BLOCK_SIZE..]);
        assert_eq!(ContentHash::from_bytes(&out), hashes[1]);
    }

    #[test]
    fn test_serve_list() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one"), b"1").unwrap();
        let root = format!("{}/", dir.path().display());

        let mut out = Vec::new();
        serve(
            &Request::List {
                budget: Budget::Unbounded,
                paths: vec![root],
            },
            &mut out,
        )
        .unwrap();
        let listing = decode_listing(&out).unwrap();
        assert_eq!(listing.files.len(), 1);
        assert!(listing.files[0].block_hashes.is_none());
        assert!(!String::from_utf8(out).unwrap().contains("local_path"));
    }

    #[test]
    fn test_decode_fingerprint_requires_hashes() {
        let listing_entry = br#"{"name":"/f","modTime":{"secs":1,"nanos":0},"size":0}"#;
        assert!(decode_fingerprint(listing_entry).is_err());
        assert!(decode_listing(b"not json").is_err());
    }
}
