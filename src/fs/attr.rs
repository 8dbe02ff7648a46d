//! Attribute operations: getattr, truncate and utimens, path-addressed and
//! independent of the FUSE types so they can be driven directly in tests.

use tracing::debug;

use super::BridgeContext;
use super::resolve::{list_dir, remote_id, resolve};
use super::session;
use crate::error::BridgeError;

/// What getattr learned about a path; the FUSE layer turns this into a
/// `stat` with the caller's uid/gid and wall-clock timestamps (the remote's
/// mtime is not surfaced here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrInfo {
    Dir { subfolder_count: u32 },
    File { size: u64 },
}

pub async fn getattr(ctx: &BridgeContext, path: &str) -> Result<AttrInfo, BridgeError> {
    // A file created but not yet released is invisible to the server; it
    // still has to stat as an empty regular file or the write that follows
    // create() would never be issued.
    if ctx.sessions.is_new_create(path) {
        return Ok(AttrInfo::File { size: 0 });
    }
    let entry = resolve(ctx, path).await?;
    if entry.is_dir {
        let count = subfolder_count(ctx, &entry.id).await?;
        Ok(AttrInfo::Dir {
            subfolder_count: count,
        })
    } else {
        let size = file_size_for_stat(ctx, &entry.id).await?;
        Ok(AttrInfo::File { size })
    }
}

/// Subfolder count of a directory: the hot token from the last readdir
/// prefetch if one is armed, otherwise counted from a (revalidated) listing.
async fn subfolder_count(ctx: &BridgeContext, dir_id: &str) -> Result<u32, BridgeError> {
    if let Some(count) = ctx.caches.take_subfolder_count(dir_id) {
        debug!("subfolder count of {dir_id} served hot");
        return Ok(count);
    }
    let entries = list_dir(ctx, dir_id).await?;
    let count = entries.iter().filter(|e| e.is_dir()).count() as u32;
    ctx.caches.store_subfolder_count(dir_id, count);
    Ok(count)
}

async fn file_size_for_stat(ctx: &BridgeContext, file_id: &str) -> Result<u64, BridgeError> {
    if let Some(size) = ctx.caches.take_file_size(file_id) {
        debug!("size of {file_id} served hot");
        return Ok(size);
    }
    session::file_size(ctx, file_id).await
}

/// Shrink a file to `new_size` bytes by shadow-copying only the prefix.
/// Growing (or matching) the current size is a no-op.
pub async fn truncate(ctx: &BridgeContext, path: &str, new_size: u64) -> Result<(), BridgeError> {
    let entry = resolve(ctx, path).await?;
    if entry.is_dir {
        return Err(BridgeError::Unsupported);
    }
    let current = session::file_size(ctx, &entry.id).await?;
    if current <= new_size {
        debug!("truncate of {path} to {new_size} covers the whole file, nothing to do");
        return Ok(());
    }
    session::open_shadow_copy(ctx, path, new_size).await
}

/// Set the modification time. The remote has no access-time concept, so a
/// missing mtime makes the whole call a no-op.
pub async fn utimens(
    ctx: &BridgeContext,
    path: &str,
    mtime_secs: Option<i64>,
) -> Result<(), BridgeError> {
    let Some(secs) = mtime_secs else {
        return Ok(());
    };
    let id = remote_id(ctx, path).await?;
    ctx.client.set_mtime(&id, secs).await?;
    Ok(())
}
