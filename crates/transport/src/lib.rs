//! chunksync-transport: remote command channels
//!
//! `SshTransport` runs each verb as its own `ssh` invocation;
//! `LocalTransport` answers in-process against the local filesystem.

pub mod local;
pub mod ssh;

pub use local::LocalTransport;
pub use ssh::{SshDestination, SshTransport};
