//! Rename and move. Remote ids are stable, so the whole operation is a
//! patch (or two) plus a re-key of the path cache.

use tracing::debug;

use super::BridgeContext;
use super::resolve::{resolve, split_path};
use crate::error::BridgeError;

pub async fn rename(
    ctx: &BridgeContext,
    old_path: &str,
    new_path: &str,
    flags: u32,
) -> Result<(), BridgeError> {
    if flags & libc::RENAME_EXCHANGE != 0 {
        return Err(BridgeError::Unsupported);
    }

    let old = resolve(ctx, old_path).await?;
    let target = match resolve(ctx, new_path).await {
        Ok(entry) => Some(entry),
        Err(BridgeError::NotFound) => None,
        Err(err) => return Err(err),
    };

    if let Some(target) = target {
        if flags & libc::RENAME_NOREPLACE != 0 {
            return Err(BridgeError::AlreadyExists);
        }
        debug!("rename target {new_path} exists, removing it first");
        ctx.client.remove(&target.id).await?;
        ctx.caches.remove_path_id(new_path);
        if target.is_dir {
            ctx.caches.remove_subfolder_count(&target.id);
        } else {
            ctx.caches.remove_file_size(&target.id);
        }
    }

    let (old_parent, old_name) = split_path(old_path);
    let (new_parent, new_name) = split_path(new_path);

    if old_parent != new_parent {
        let new_parent_id = resolve(ctx, new_parent).await?.id;
        ctx.client.move_to(&old.id, &new_parent_id).await?;
    }
    if old_name != new_name {
        ctx.client.rename(&old.id, new_name).await?;
    }

    // The object keeps its id; only the path key changes.
    ctx.caches.rekey_path_id(old_path, new_path);
    Ok(())
}
