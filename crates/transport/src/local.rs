//! Local in-process transport for testing
//!
//! `LocalTransport` answers requests against the local filesystem without
//! SSH. Requests still go through their argument form, so the protocol
//! boundary is exercised exactly as the agent sees it.

use async_trait::async_trait;
use bytes::Bytes;

use chunksync_core::error::Result;
use chunksync_core::protocol::serve;
use chunksync_core::{RemoteChannel, Request, SyncError};

/// Local transport for testing (no SSH, operates on local filesystem)
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl LocalTransport {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteChannel for LocalTransport {
    async fn execute(&self, request: &Request) -> Result<Bytes> {
        let command = request.command_line("local");
        let request = Request::from_args(&request.to_args())?;

        let output = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            serve(&request, &mut out).map(|()| out)
        })
        .await
        .map_err(|e| SyncError::channel(&command, e.to_string()))?;

        // A failing verb looks like a non-zero exit from the remote side.
        output
            .map(Bytes::from)
            .map_err(|e| SyncError::channel(command, e.to_string()))
    }
}
