//! Write sessions: the bridge's answer to a remote that cannot modify a
//! file once its upload is closed.
//!
//! A session is keyed by the absolute local path and lives from
//! create/open/truncate until release. Two shapes exist:
//!
//! - `NewCreate`: create() opened a resumable upload for a brand-new file;
//!   writes stream into it and release() closes it.
//! - `ShadowCopy`: open-for-write or truncate cannot touch the original, so
//!   a temp sibling (`<name>.bridge_temp_file`) is uploaded with the bytes
//!   to keep, writes go into the temp, and release() closes it, deletes the
//!   original and renames the temp over it.
//!
//! release() is the only finalizer. The FUSE host serializes
//! create→write*→release per path, so no per-path locking is added here.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, warn};

use super::BridgeContext;
use super::resolve::{resolve, split_path};
use crate::api_client::Fetched;
use crate::error::BridgeError;

/// Stride for the shadow-copy byte transfer; writes are strictly sequential.
pub const CHUNK_SIZE: usize = 4096;

/// Suffix of the temp sibling used for shadow copies.
pub const TEMP_SUFFIX: &str = ".bridge_temp_file";

#[derive(Debug, Clone)]
pub enum WriteSession {
    NewCreate {
        file_id: String,
    },
    ShadowCopy {
        temp_id: String,
        original_id: String,
        original_name: String,
        parent_id: String,
    },
}

impl WriteSession {
    /// The resumable upload that write() chunks go into.
    pub fn upload_id(&self) -> &str {
        match self {
            WriteSession::NewCreate { file_id } => file_id,
            WriteSession::ShadowCopy { temp_id, .. } => temp_id,
        }
    }
}

/// Live sessions, keyed by absolute local path. A path has at most one.
#[derive(Default)]
pub struct WriteSessions {
    inner: RwLock<HashMap<String, WriteSession>>,
}

impl WriteSessions {
    pub fn install(&self, path: impl Into<String>, session: WriteSession) {
        self.inner.write().unwrap().insert(path.into(), session);
    }

    pub fn take(&self, path: &str) -> Option<WriteSession> {
        self.inner.write().unwrap().remove(path)
    }

    pub fn upload_id(&self, path: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .get(path)
            .map(|s| s.upload_id().to_string())
    }

    /// Id of a file created but not yet released; the server does not list
    /// it, so resolution has to come through here.
    pub fn created_id(&self, path: &str) -> Option<String> {
        match self.inner.read().unwrap().get(path) {
            Some(WriteSession::NewCreate { file_id }) => Some(file_id.clone()),
            _ => None,
        }
    }

    pub fn is_new_create(&self, path: &str) -> bool {
        matches!(
            self.inner.read().unwrap().get(path),
            Some(WriteSession::NewCreate { .. })
        )
    }
}

/// Current size of a file by id: a conditional stat, falling back to the
/// cached value on 304. Does not touch the hot token; that belongs to
/// getattr.
pub async fn file_size(ctx: &BridgeContext, file_id: &str) -> Result<u64, BridgeError> {
    let etag = ctx.caches.file_size_etag(file_id);
    match ctx.client.stat_size(file_id, etag.as_deref()).await? {
        Fetched::Fresh { value, etag } => {
            ctx.caches.store_file_size(file_id, value, etag);
            Ok(value)
        }
        Fetched::NotModified => Ok(ctx.caches.cached_file_size(file_id).unwrap_or(0)),
    }
}

/// Open a shadow copy for `path`: upload bytes `[0, copy_len)` of the
/// original into a temp sibling and install the session.
pub async fn open_shadow_copy(
    ctx: &BridgeContext,
    path: &str,
    copy_len: u64,
) -> Result<(), BridgeError> {
    let (parent_path, name) = split_path(path);
    let parent_id = resolve(ctx, parent_path).await?.id;
    let original = resolve(ctx, path).await?;
    let temp_name = format!("{name}{TEMP_SUFFIX}");
    debug!("shadow copy of {path}: {copy_len} bytes into {temp_name}");

    let temp_id = ctx.client.file_write_open(&parent_id, &temp_name).await?;
    let mut copied = 0u64;
    while copied < copy_len {
        let want = CHUNK_SIZE.min((copy_len - copied) as usize);
        let chunk = ctx.client.read_range(&original.id, copied, want).await?;
        if chunk.is_empty() {
            // The original ended short of copy_len; nothing more to carry.
            break;
        }
        let len = chunk.len() as u64;
        ctx.client.write_chunk(&temp_id, copied, chunk).await?;
        copied += len;
    }

    ctx.sessions.install(
        path,
        WriteSession::ShadowCopy {
            temp_id,
            original_id: original.id,
            original_name: name.to_string(),
            parent_id,
        },
    );
    Ok(())
}

/// Finalize whatever session `path` holds. Paths without a session release
/// as a no-op (read-only opens never had one).
pub async fn finalize(ctx: &BridgeContext, path: &str) -> Result<(), BridgeError> {
    let Some(session) = ctx.sessions.take(path) else {
        return Ok(());
    };
    match session {
        WriteSession::NewCreate { file_id } => {
            debug!("closing created file {path}");
            ctx.client.file_write_close(&file_id).await?;
            ctx.caches.insert_path_id(path, &file_id, false);
            Ok(())
        }
        WriteSession::ShadowCopy {
            temp_id,
            original_id,
            original_name,
            ..
        } => {
            debug!("finalizing shadow copy of {path}");
            // Delete-then-rename: if this is interrupted, the bytes still
            // exist in the temp sibling next to where the original was.
            if let Err(err) = ctx.client.file_write_close(&temp_id).await {
                warn!("failed to close temp upload for {path}: {err}");
            }
            ctx.client.remove(&original_id).await?;
            ctx.caches.remove_file_size(&original_id);
            ctx.caches.replace_path_id(path, &temp_id);
            ctx.client.rename(&temp_id, &original_name).await?;
            Ok(())
        }
    }
}
