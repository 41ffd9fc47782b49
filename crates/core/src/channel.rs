//! The remote command channel seam between the engine and a transport

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::protocol::Request;

/// Runs one request on the remote peer and returns its complete output.
///
/// Each call is an independent round trip. Implementations must report a
/// failed or timed-out command as [`SyncError::Channel`](crate::SyncError::Channel)
/// and never return partial output as success.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    async fn execute(&self, request: &Request) -> Result<Bytes>;
}

#[async_trait]
impl<C: RemoteChannel + ?Sized> RemoteChannel for &C {
    async fn execute(&self, request: &Request) -> Result<Bytes> {
        (**self).execute(request).await
    }
}

#[async_trait]
impl<C: RemoteChannel + ?Sized> RemoteChannel for Box<C> {
    async fn execute(&self, request: &Request) -> Result<Bytes> {
        (**self).execute(request).await
    }
}
