//! Path resolution against the ID-addressed remote.
//!
//! The remote only understands opaque ids, so every path is walked from the
//! root id through directory listings. Each verified segment lands in the
//! path→id cache; nothing is recorded beyond what the server confirmed.

use tracing::debug;

use super::BridgeContext;
use super::cache::{PathIdEntry, ROOT_ID};
use crate::api_client::{Entry, Fetched};
use crate::error::BridgeError;

/// List one directory through the listing cache, revalidating with the
/// stored ETag when there is one.
pub async fn list_dir(ctx: &BridgeContext, parent_id: &str) -> Result<Vec<Entry>, BridgeError> {
    let url = ctx.client.list_url(parent_id);
    let etag = ctx.caches.listing_etag(&url);
    match ctx.client.list(parent_id, etag.as_deref()).await {
        Ok(Fetched::Fresh { value, etag }) => {
            ctx.caches.store_listing(&url, etag, value.clone());
            Ok(value)
        }
        Ok(Fetched::NotModified) => {
            debug!("listing of {parent_id} served from cache");
            Ok(ctx
                .caches
                .listing(&url)
                .map(|l| l.entries)
                .unwrap_or_default())
        }
        Err(err) => {
            if err.parent_vanished() {
                ctx.caches.drop_listing(&url);
            }
            Err(err.into())
        }
    }
}

/// Walk `path` down from the root, returning the remote id and kind of the
/// final segment. Paths whose intermediate segments are files do not exist.
pub async fn resolve(ctx: &BridgeContext, path: &str) -> Result<PathIdEntry, BridgeError> {
    if path.is_empty() || path == "/" {
        return Ok(PathIdEntry {
            id: ROOT_ID.to_string(),
            is_dir: true,
        });
    }
    if let Some(hit) = ctx.caches.path_id(path) {
        return Ok(hit);
    }

    debug!("resolving {path} from the root listing");
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last = segments.len().saturating_sub(1);
    let mut current = PathIdEntry {
        id: ROOT_ID.to_string(),
        is_dir: true,
    };
    let mut walked = String::new();

    for (i, segment) in segments.iter().enumerate() {
        let entries = list_dir(ctx, &current.id).await?;
        let child = entries
            .iter()
            .find(|e| e.name == *segment)
            .ok_or(BridgeError::NotFound)?;
        walked.push('/');
        walked.push_str(segment);
        current = PathIdEntry {
            id: child.id.clone(),
            is_dir: child.is_dir(),
        };
        ctx.caches
            .insert_path_id(walked.clone(), &current.id, current.is_dir);
        if !current.is_dir && i < last {
            return Err(BridgeError::NotFound);
        }
    }
    Ok(current)
}

/// Remote id of `path`, also recognizing files whose upload is still open
/// from create(): the server does not list those yet, their id lives in the
/// write-session table.
pub async fn remote_id(ctx: &BridgeContext, path: &str) -> Result<String, BridgeError> {
    if let Some(hit) = ctx.caches.path_id(path) {
        return Ok(hit.id);
    }
    if let Some(id) = ctx.sessions.created_id(path) {
        return Ok(id);
    }
    Ok(resolve(ctx, path).await?.id)
}

/// Split an absolute path into (parent path, entry name).
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("/", path),
    }
}

/// Join a directory path and a child name into an absolute path.
pub fn join_child(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}
