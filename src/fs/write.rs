//! Write-side operations: write into the live session and release.

use bytes::Bytes;
use tracing::warn;

use super::BridgeContext;
use super::session;
use crate::error::BridgeError;

/// Stream one write into the path's open upload. create/open/truncate must
/// have installed a session first; the kernel guarantees that ordering.
pub async fn write(
    ctx: &BridgeContext,
    path: &str,
    offset: u64,
    data: &[u8],
) -> Result<usize, BridgeError> {
    let Some(upload_id) = ctx.sessions.upload_id(path) else {
        warn!("write to {path} without an open write session");
        return Err(BridgeError::NoWriteSession);
    };
    ctx.client
        .write_chunk(&upload_id, offset, Bytes::copy_from_slice(data))
        .await?;
    Ok(data.len())
}

/// Finalize the path's session, if any. Read-only opens fall through.
pub async fn release(ctx: &BridgeContext, path: &str) -> Result<(), BridgeError> {
    session::finalize(ctx, path).await
}
