//! End-to-end sync scenarios against the in-process transport
//!
//! The "remote" tree is a temporary directory served by `LocalTransport`;
//! wrapper channels record or tamper with the traffic.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use chunksync_core::engine::partial_path;
use chunksync_core::error::Result;
use chunksync_core::{
    BLOCK_SIZE, Budget, RemoteChannel, Request, SizeMatchPolicy, SyncEngine, SyncError,
    SyncMapping, SyncOptions,
};
use chunksync_transport::LocalTransport;

/// Records every request before forwarding it
#[derive(Default)]
struct Recording {
    requests: Mutex<Vec<Request>>,
}

impl Recording {
    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    fn get_indices(&self) -> Vec<u64> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::Get { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }

    fn hashed(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::Hash { path } => Some(path),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RemoteChannel for Recording {
    async fn execute(&self, request: &Request) -> Result<Bytes> {
        self.requests.lock().unwrap().push(request.clone());
        LocalTransport.execute(request).await
    }
}

/// Flips the first byte of every block it serves
struct Corrupting;

#[async_trait]
impl RemoteChannel for Corrupting {
    async fn execute(&self, request: &Request) -> Result<Bytes> {
        let body = LocalTransport.execute(request).await?;
        if !matches!(request, Request::Get { .. }) {
            return Ok(body);
        }
        let mut body = body.to_vec();
        if let Some(first) = body.first_mut() {
            *first ^= 0xff;
        }
        Ok(Bytes::from(body))
    }
}

struct Fixture {
    _dir: TempDir,
    remote: PathBuf,
    local: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let remote = dir.path().join("remote");
        let local = dir.path().join("local");
        std::fs::create_dir_all(&remote).unwrap();
        std::fs::create_dir_all(&local).unwrap();
        Self {
            _dir: dir,
            remote,
            local,
        }
    }

    fn mappings(&self) -> Vec<SyncMapping> {
        vec![SyncMapping::new(&self.local, self.remote.to_str().unwrap()).unwrap()]
    }

    fn remote_file(&self, name: &str, data: &[u8], secs: u64) -> PathBuf {
        write_at(&self.remote.join(name), data, secs)
    }

    fn local_path(&self, name: &str) -> PathBuf {
        self.local.join(name)
    }
}

fn write_at(path: &Path, data: &[u8], secs: u64) -> PathBuf {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
    let time = filetime::FileTime::from_system_time(UNIX_EPOCH + Duration::from_secs(secs));
    filetime::set_file_mtime(path, time).unwrap();
    path.to_path_buf()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + usize::from(seed) * 7) % 251) as u8)
        .collect()
}

#[tokio::test]
async fn test_fetches_everything_when_unbounded() {
    let fx = Fixture::new();
    let a = pattern(5 * 1024, 1);
    let b = pattern(5 * 1024, 2);
    fx.remote_file("A", &a, 10);
    fx.remote_file("sub/B", &b, 20);

    let report = SyncEngine::new(LocalTransport)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(std::fs::read(fx.local_path("A")).unwrap(), a);
    assert_eq!(std::fs::read(fx.local_path("sub/B")).unwrap(), b);
    assert!(report.cleanup.removed_files.is_empty());

    let names: Vec<_> = std::fs::read_dir(&fx.local)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names.len(), 2, "no extras: {names:?}");
}

#[tokio::test]
async fn test_budget_keeps_newest_only() {
    let fx = Fixture::new();
    fx.remote_file("A", &pattern(5 * 1024, 1), 10);
    fx.remote_file("B", &pattern(5 * 1024, 2), 20);

    let recording = Recording::default();
    SyncEngine::new(&recording)
        .sync(Budget::Bytes(6 * 1024), &fx.mappings())
        .await
        .unwrap();

    assert!(fx.local_path("B").exists());
    assert!(!fx.local_path("A").exists());
    let hashed = recording.hashed();
    assert_eq!(hashed.len(), 1);
    assert!(hashed[0].ends_with("/B"));
}

#[tokio::test]
async fn test_size_match_is_skipped_without_remote_calls() {
    let fx = Fixture::new();
    fx.remote_file("same", &pattern(4096, 1), 10);
    // Same size, different bytes: trusted as in sync.
    let local = write_at(&fx.local_path("same"), &[0u8; 4096], 10);

    let recording = Recording::default();
    let report = SyncEngine::new(&recording)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(recording.requests().len(), 1, "only the listing");
    assert!(matches!(recording.requests()[0], Request::List { .. }));
    assert_eq!(std::fs::read(local).unwrap(), vec![0u8; 4096]);
}

#[tokio::test]
async fn test_partial_file_resumes_after_verified_blocks() {
    let fx = Fixture::new();
    let data = pattern(5 * BLOCK_SIZE + 100, 3);
    fx.remote_file("big.bin", &data, 10);

    let dest = fx.local_path("big.bin");
    let mut partial = data[..2 * BLOCK_SIZE].to_vec();
    partial.extend_from_slice(b"torn write");
    std::fs::write(partial_path(&dest).unwrap(), &partial).unwrap();

    let recording = Recording::default();
    let report = SyncEngine::new(&recording)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    assert_eq!(recording.get_indices(), vec![2, 3, 4, 5]);
    assert_eq!(report.blocks_fetched, 4);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    assert!(!partial_path(&dest).unwrap().exists());
}

#[tokio::test]
async fn test_corrupt_block_aborts_without_installing() {
    let fx = Fixture::new();
    fx.remote_file("victim", &pattern(BLOCK_SIZE + 10, 4), 10);

    let err = SyncEngine::new(Corrupting)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap_err();

    assert!(err.is_integrity(), "{err}");
    assert!(matches!(err, SyncError::Integrity { block: 0, .. }));
    assert!(!fx.local_path("victim").exists());
    // The checkpoint stays behind for inspection.
    assert!(partial_path(&fx.local_path("victim")).unwrap().exists());
}

#[tokio::test]
async fn test_stale_local_files_are_collected() {
    let fx = Fixture::new();
    fx.remote_file("keep.txt", b"keep", 10);
    write_at(&fx.local_path("keep.txt"), b"keep", 10);
    write_at(&fx.local_path("old/stale.txt"), b"stale", 5);
    write_at(&fx.local_path("old/older/stale2.txt"), b"stale", 5);
    // Left behind by an earlier run for a file the remote no longer has.
    write_at(
        &partial_path(&fx.local_path("old/gone.bin")).unwrap(),
        b"half",
        5,
    );
    write_at(&fx.local_path(".hidden-note"), b"mine", 5);

    let report = SyncEngine::new(LocalTransport)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    assert!(fx.local_path("keep.txt").exists());
    assert!(fx.local_path(".hidden-note").exists());
    assert!(!fx.local_path("old").exists());
    assert_eq!(report.cleanup.removed_files.len(), 3);
    assert_eq!(report.cleanup.removed_dirs.len(), 2);
    assert!(report.cleanup.is_clean());
}

#[tokio::test]
async fn test_grown_remote_file_resumes_from_destination() {
    let fx = Fixture::new();
    let data = pattern(3 * BLOCK_SIZE + 10, 5);
    fx.remote_file("log", &data, 10);
    write_at(&fx.local_path("log"), &data[..2 * BLOCK_SIZE], 5);

    let recording = Recording::default();
    let report = SyncEngine::new(&recording)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    assert_eq!(report.resumed, 1);
    assert_eq!(recording.get_indices(), vec![2, 3]);
    assert_eq!(std::fs::read(fx.local_path("log")).unwrap(), data);
}

#[tokio::test]
async fn test_early_change_refetches_everything_after_it() {
    let fx = Fixture::new();
    let data = pattern(4 * BLOCK_SIZE, 6);
    fx.remote_file("f", &data, 10);
    let mut local = data.clone();
    local[BLOCK_SIZE + 1] ^= 1;
    local.truncate(4 * BLOCK_SIZE - 1);
    write_at(&fx.local_path("f"), &local, 5);

    let recording = Recording::default();
    SyncEngine::new(&recording)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    assert_eq!(recording.get_indices(), vec![1, 2, 3]);
    assert_eq!(std::fs::read(fx.local_path("f")).unwrap(), data);
}

#[tokio::test]
async fn test_verify_policy_repairs_same_size_corruption() {
    let fx = Fixture::new();
    let data = pattern(3 * BLOCK_SIZE, 7);
    fx.remote_file("f", &data, 10);
    let mut local = data.clone();
    local[2 * BLOCK_SIZE + 5] ^= 1;
    write_at(&fx.local_path("f"), &local, 10);

    let recording = Recording::default();
    let options = SyncOptions {
        size_match: SizeMatchPolicy::Verify,
        parallelism: 1,
    };
    let report = SyncEngine::new(&recording)
        .with_options(options)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    assert_eq!(report.resumed, 1);
    assert_eq!(recording.get_indices(), vec![2]);
    assert_eq!(recording.hashed().len(), 1, "fingerprint is reused");
    assert_eq!(std::fs::read(fx.local_path("f")).unwrap(), data);
}

#[tokio::test]
async fn test_parallel_fetch_matches_sequential() {
    let fx = Fixture::new();
    let data = pattern(10 * BLOCK_SIZE + 3, 8);
    fx.remote_file("wide", &data, 10);

    let options = SyncOptions {
        size_match: SizeMatchPolicy::Trust,
        parallelism: 4,
    };
    SyncEngine::new(LocalTransport)
        .with_options(options)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    assert_eq!(std::fs::read(fx.local_path("wide")).unwrap(), data);
}

#[tokio::test]
async fn test_empty_file_synced_once_then_skipped() {
    let fx = Fixture::new();
    fx.remote_file("empty", b"", 10);

    let recording = Recording::default();
    SyncEngine::new(&recording)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();
    assert_eq!(std::fs::metadata(fx.local_path("empty")).unwrap().len(), 0);
    assert!(recording.get_indices().is_empty());

    let second = Recording::default();
    let report = SyncEngine::new(&second)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(second.requests().len(), 1);
}

#[tokio::test]
async fn test_installed_file_carries_remote_mtime() {
    let fx = Fixture::new();
    fx.remote_file("dated", b"content", 1_704_067_200);

    SyncEngine::new(LocalTransport)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    let modified = std::fs::metadata(fx.local_path("dated"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(modified, UNIX_EPOCH + Duration::from_secs(1_704_067_200));
}

#[tokio::test]
async fn test_pre_epoch_file_syncs_with_its_mtime() {
    let fx = Fixture::new();
    let path = fx.remote_file("1969.txt", b"moon landing", 0);
    let ancient = filetime::FileTime::from_unix_time(-86_400, 0);
    filetime::set_file_mtime(&path, ancient).unwrap();
    fx.remote_file("new.txt", b"today", 10);

    let report = SyncEngine::new(LocalTransport)
        .sync(Budget::Unbounded, &fx.mappings())
        .await
        .unwrap();

    assert_eq!(report.fetched, 2);
    let local = std::fs::metadata(fx.local_path("1969.txt")).unwrap();
    assert_eq!(filetime::FileTime::from_last_modification_time(&local), ancient);
}

#[tokio::test]
async fn test_fresh_fetch_matches_resumed_fetch() {
    let fresh = Fixture::new();
    let resumed = Fixture::new();
    let data = pattern(3 * BLOCK_SIZE + 17, 9);
    fresh.remote_file("f", &data, 10);
    resumed.remote_file("f", &data, 10);

    let dest = resumed.local_path("f");
    let mut partial = data[..BLOCK_SIZE].to_vec();
    partial.extend_from_slice(&[0u8; 300]);
    std::fs::write(partial_path(&dest).unwrap(), partial).unwrap();

    for fx in [&fresh, &resumed] {
        SyncEngine::new(LocalTransport)
            .sync(Budget::Unbounded, &fx.mappings())
            .await
            .unwrap();
    }

    assert_eq!(
        std::fs::read(fresh.local_path("f")).unwrap(),
        std::fs::read(&dest).unwrap()
    );
}

#[tokio::test]
async fn test_missing_remote_root_fails_the_sync() {
    let fx = Fixture::new();
    let mappings = vec![
        SyncMapping::new(&fx.local, fx.remote.join("absent").to_str().unwrap()).unwrap(),
    ];
    write_at(&fx.local_path("untouched"), b"x", 1);

    let err = SyncEngine::new(LocalTransport)
        .sync(Budget::Unbounded, &mappings)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Channel { .. }), "{err}");
    assert!(fx.local_path("untouched").exists(), "no cleanup after failure");
}
