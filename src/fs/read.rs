//! Read-side operations: readdir (with its cache prefetches), read and open.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, warn};

use super::BridgeContext;
use super::resolve::{join_child, list_dir, remote_id, resolve};
use super::session;
use crate::api_client::{Entry, EntryKind, Fetched};
use crate::error::BridgeError;

/// List a directory and warm every cache a stat burst will want next:
/// path→id for each child, hot sizes for files, and one multi-parent
/// listing priming hot subfolder counts for all child directories.
pub async fn readdir(ctx: &BridgeContext, path: &str) -> Result<Vec<Entry>, BridgeError> {
    let dir = resolve(ctx, path).await?;
    if !dir.is_dir {
        return Err(BridgeError::NotADirectory);
    }
    let entries = list_dir(ctx, &dir.id).await?;

    let mut subdir_ids = Vec::new();
    for entry in &entries {
        ctx.caches
            .insert_path_id(join_child(path, &entry.name), &entry.id, entry.is_dir());
        match &entry.kind {
            EntryKind::Dir => subdir_ids.push(entry.id.clone()),
            EntryKind::File { size } => ctx.caches.prime_file_size(&entry.id, *size),
        }
    }

    if !subdir_ids.is_empty() {
        prefetch_subfolder_counts(ctx, &subdir_ids).await;
    }
    Ok(entries)
}

/// One round trip over all child directories; arms their subfolder counts.
/// A failed prefetch costs nothing but the later per-directory listings, so
/// it never fails the readdir itself.
async fn prefetch_subfolder_counts(ctx: &BridgeContext, subdir_ids: &[String]) {
    let csv = subdir_ids.join(",");
    let url = ctx.client.list_multi_url(&csv);
    let etag = ctx.caches.listing_etag(&url);
    match ctx.client.list_multi(&csv, etag.as_deref()).await {
        Ok(Fetched::Fresh { value, etag }) => {
            let mut counts: HashMap<&str, u32> =
                subdir_ids.iter().map(|id| (id.as_str(), 0)).collect();
            for child in &value {
                if !child.is_dir() {
                    continue;
                }
                if let Some(count) = child
                    .parent_id
                    .as_deref()
                    .and_then(|pid| counts.get_mut(pid))
                {
                    *count += 1;
                }
            }
            for (id, count) in counts {
                ctx.caches.prime_subfolder_count(id, count);
            }
            ctx.caches.store_listing(&url, etag, value);
        }
        Ok(Fetched::NotModified) => {
            debug!("subfolder prefetch unchanged, re-arming {} counts", subdir_ids.len());
            for id in subdir_ids {
                ctx.caches.rearm_subfolder_count(id);
            }
        }
        Err(err) => warn!("subfolder count prefetch failed: {err}"),
    }
}

/// Read up to `len` bytes at `offset`; empty files read as zero bytes.
pub async fn read(
    ctx: &BridgeContext,
    path: &str,
    offset: u64,
    len: usize,
) -> Result<Bytes, BridgeError> {
    let id = remote_id(ctx, path).await?;
    Ok(ctx.client.read_range(&id, offset, len).await?)
}

/// Open a file. Reads need no state (the remote serves ranges from the
/// original id) and an O_TRUNC open is followed by a truncate that builds
/// the session; everything else needs a full shadow copy up front.
pub async fn open(ctx: &BridgeContext, path: &str, flags: i32) -> Result<(), BridgeError> {
    let access = flags & libc::O_ACCMODE;
    if access == libc::O_RDONLY || (flags & libc::O_TRUNC) != 0 {
        return Ok(());
    }
    debug!("open of {path} wants write access, shadow-copying");
    let entry = resolve(ctx, path).await?;
    let size = session::file_size(ctx, &entry.id).await?;
    session::open_shadow_copy(ctx, path, size).await
}
