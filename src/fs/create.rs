//! Creation operations: create (files) and mkdir.

use tracing::debug;

use super::BridgeContext;
use super::resolve::{resolve, split_path};
use super::session::WriteSession;
use crate::error::BridgeError;

/// Create a file: open a resumable upload in the parent and leave it open.
/// The server will not list the file until release() closes the upload, so
/// the id is kept in the session table rather than the path cache.
pub async fn create(ctx: &BridgeContext, path: &str) -> Result<(), BridgeError> {
    let (parent_path, name) = split_path(path);
    let parent_id = resolve(ctx, parent_path).await?.id;
    let file_id = ctx.client.file_write_open(&parent_id, name).await?;
    debug!("created {path} as {file_id}, upload held open");
    ctx.sessions
        .install(path, WriteSession::NewCreate { file_id });
    Ok(())
}

/// Create a directory and record its id; a fresh directory has no
/// subfolders, so its count is seeded without a round trip.
pub async fn mkdir(ctx: &BridgeContext, path: &str) -> Result<(), BridgeError> {
    let (parent_path, name) = split_path(path);
    let parent_id = resolve(ctx, parent_path).await?.id;
    let new_id = ctx.client.make_dir(name, &parent_id).await?;
    ctx.caches.store_subfolder_count(&new_id, 0);
    ctx.caches.insert_path_id(path, new_id, true);
    Ok(())
}
