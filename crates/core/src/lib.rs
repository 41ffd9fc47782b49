//! chunksync-core: Core sync engine
//!
//! Provides block fingerprinting, enumeration, the remote command protocol,
//! the reconciliation engine and local garbage collection.

pub mod block;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod gc;
pub mod hash;
pub mod mapping;
pub mod protocol;
pub mod scan;

pub use channel::RemoteChannel;
pub use config::{SizeMatchPolicy, SyncConfig};
pub use engine::{SyncAction, SyncEngine, SyncEvent, SyncObserver, SyncOptions, SyncReport};
pub use error::SyncError;
pub use gc::{CleanupReport, GarbageCollector};
pub use hash::{BLOCK_SIZE, ContentHash};
pub use mapping::SyncMapping;
pub use protocol::{Listing, Request};
pub use scan::{Budget, FileEntry, Scanner};
