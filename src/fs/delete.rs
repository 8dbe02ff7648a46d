//! Deletion operations: unlink and rmdir.

use super::BridgeContext;
use super::resolve::resolve;
use crate::error::BridgeError;

pub async fn unlink(ctx: &BridgeContext, path: &str) -> Result<(), BridgeError> {
    let entry = resolve(ctx, path).await?;
    ctx.client.remove(&entry.id).await?;
    ctx.caches.remove_path_id(path);
    ctx.caches.remove_file_size(&entry.id);
    Ok(())
}

pub async fn rmdir(ctx: &BridgeContext, path: &str) -> Result<(), BridgeError> {
    let entry = resolve(ctx, path).await?;
    ctx.client.remove(&entry.id).await?;
    ctx.caches.remove_path_id(path);
    ctx.caches.remove_subfolder_count(&entry.id);
    Ok(())
}
