//! The mounted filesystem.
//!
//! This module owns [`BridgeContext`] (shared client, caches and write
//! sessions) and adapts the inode-addressed `fuser` callbacks onto the
//! path-addressed core operations in the submodules. Each callback blocks
//! on its round trips via the embedded Tokio runtime; errno mapping happens
//! here and nowhere else.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::ENOENT;
use tracing::{debug, warn};

use crate::api_client::RemoteClient;
use crate::error::BridgeError;

pub mod attr;
pub mod cache;
pub mod create;
pub mod delete;
pub mod read;
pub mod rename;
pub mod resolve;
pub mod session;
pub mod write;

pub use resolve::{join_child, split_path};

use attr::AttrInfo;
use cache::BridgeCaches;
use session::WriteSessions;

/// How long the kernel may reuse attributes and entries on its own.
const TTL: Duration = Duration::from_secs(1);

const ROOT_INO: u64 = 1;

/// Everything the core operations share, owned by the mount and passed
/// explicitly; there is no module-level state.
pub struct BridgeContext {
    pub client: RemoteClient,
    pub caches: BridgeCaches,
    pub sessions: WriteSessions,
}

impl BridgeContext {
    pub fn new(client: RemoteClient) -> Self {
        Self {
            client,
            caches: BridgeCaches::new(),
            sessions: WriteSessions::default(),
        }
    }
}

/// `fuser` addresses everything by inode while the bridge is path-addressed;
/// this table is the adapter. Inode 1 is "/" forever.
struct InodeTable {
    inode_to_path: HashMap<u64, String>,
    path_to_inode: HashMap<String, u64>,
    next_inode: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            inode_to_path: HashMap::new(),
            path_to_inode: HashMap::new(),
            next_inode: 2,
        };
        table.inode_to_path.insert(ROOT_INO, "/".to_string());
        table.path_to_inode.insert("/".to_string(), ROOT_INO);
        table
    }

    fn path_of(&self, ino: u64) -> Option<&str> {
        self.inode_to_path.get(&ino).map(String::as_str)
    }

    fn get_or_assign(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_inode.get(path) {
            return ino;
        }
        let ino = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(path.to_string(), ino);
        self.inode_to_path.insert(ino, path.to_string());
        ino
    }

    fn forget(&mut self, path: &str) {
        if let Some(ino) = self.path_to_inode.remove(path) {
            self.inode_to_path.remove(&ino);
        }
    }

    fn rekey(&mut self, old_path: &str, new_path: &str) {
        let Some(ino) = self.path_to_inode.remove(old_path) else {
            return;
        };
        if let Some(stale) = self.path_to_inode.insert(new_path.to_string(), ino) {
            self.inode_to_path.remove(&stale);
        }
        self.inode_to_path.insert(ino, new_path.to_string());
    }
}

/// The mounted filesystem handed to `fuser::mount2`.
pub struct WdFs {
    ctx: Arc<BridgeContext>,
    runtime: tokio::runtime::Runtime,
    inodes: InodeTable,
}

impl WdFs {
    pub fn new(ctx: Arc<BridgeContext>, runtime: tokio::runtime::Runtime) -> Self {
        Self {
            ctx,
            runtime,
            inodes: InodeTable::new(),
        }
    }

    fn known_path(&self, ino: u64) -> Option<String> {
        self.inodes.path_of(ino).map(str::to_string)
    }
}

/// Log an operation failure and hand back the errno for the reply. Absent
/// entries are routine; everything else is worth a warning.
fn op_errno(op: &str, path: &str, err: &BridgeError) -> i32 {
    match err {
        BridgeError::NotFound => debug!("{op} {path}: {err}"),
        other => warn!("{op} {path}: {other}"),
    }
    err.errno()
}

/// Build the `stat` reply. uid/gid come from the calling process and the
/// timestamps are wall-clock now; the remote's mtime is not surfaced here.
fn build_attr(ino: u64, uid: u32, gid: u32, info: &AttrInfo) -> FileAttr {
    let now = SystemTime::now();
    match info {
        AttrInfo::Dir { subfolder_count } => FileAttr {
            ino,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2 + subfolder_count,
            uid,
            gid,
            rdev: 0,
            flags: 0,
            blksize: 4096,
        },
        AttrInfo::File { size } => FileAttr {
            ino,
            size: *size,
            blocks: size.div_ceil(512),
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::RegularFile,
            perm: 0o644,
            nlink: 1,
            uid,
            gid,
            rdev: 0,
            flags: 0,
            blksize: 4096,
        },
    }
}

impl Filesystem for WdFs {
    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.known_path(parent) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(ENOENT);
            return;
        };
        let full_path = join_child(&parent_path, name);
        let ctx = self.ctx.clone();
        match self.runtime.block_on(attr::getattr(&ctx, &full_path)) {
            Ok(info) => {
                let ino = self.inodes.get_or_assign(&full_path);
                reply.entry(&TTL, &build_attr(ino, req.uid(), req.gid(), &info), 0);
            }
            Err(err) => reply.error(op_errno("lookup", &full_path, &err)),
        }
    }

    fn getattr(&mut self, req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.known_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        let ctx = self.ctx.clone();
        match self.runtime.block_on(attr::getattr(&ctx, &path)) {
            Ok(info) => reply.attr(&TTL, &build_attr(ino, req.uid(), req.gid(), &info)),
            Err(err) => reply.error(op_errno("getattr", &path, &err)),
        }
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.known_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        let ctx = self.ctx.clone();

        if let Some(new_size) = size {
            if let Err(err) = self.runtime.block_on(attr::truncate(&ctx, &path, new_size)) {
                reply.error(op_errno("truncate", &path, &err));
                return;
            }
        }

        let mtime_secs = mtime.map(|m| {
            let stamp = match m {
                TimeOrNow::SpecificTime(t) => t,
                TimeOrNow::Now => SystemTime::now(),
            };
            stamp
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        });
        if mtime_secs.is_some() {
            if let Err(err) = self
                .runtime
                .block_on(attr::utimens(&ctx, &path, mtime_secs))
            {
                reply.error(op_errno("utimens", &path, &err));
                return;
            }
        }

        match self.runtime.block_on(attr::getattr(&ctx, &path)) {
            Ok(info) => reply.attr(&TTL, &build_attr(ino, req.uid(), req.gid(), &info)),
            Err(err) => reply.error(op_errno("setattr", &path, &err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.known_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        let ctx = self.ctx.clone();
        let entries = match self.runtime.block_on(read::readdir(&ctx, &path)) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(op_errno("readdir", &path, &err));
                return;
            }
        };

        let parent_ino = if path == "/" {
            ROOT_INO
        } else {
            let (parent, _) = split_path(&path);
            self.inodes.get_or_assign(parent)
        };
        let mut listing: Vec<(u64, FileType, String)> = Vec::with_capacity(entries.len() + 2);
        listing.push((ino, FileType::Directory, ".".to_string()));
        listing.push((parent_ino, FileType::Directory, "..".to_string()));
        for entry in entries {
            let child_path = join_child(&path, &entry.name);
            let child_ino = self.inodes.get_or_assign(&child_path);
            let kind = if entry.is_dir() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            listing.push((child_ino, kind, entry.name));
        }

        for (i, (entry_ino, kind, name)) in listing.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.known_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        let ctx = self.ctx.clone();
        match self
            .runtime
            .block_on(read::read(&ctx, &path, offset.max(0) as u64, size as usize))
        {
            Ok(bytes) => reply.data(&bytes),
            Err(err) => reply.error(op_errno("read", &path, &err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.known_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        let ctx = self.ctx.clone();
        match self.runtime.block_on(read::open(&ctx, &path, flags)) {
            // Sessions are keyed by path, so no file handle is needed.
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(op_errno("open", &path, &err)),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_path) = self.known_path(parent) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(ENOENT);
            return;
        };
        let full_path = join_child(&parent_path, name);
        let ctx = self.ctx.clone();
        match self.runtime.block_on(create::create(&ctx, &full_path)) {
            Ok(()) => {
                let ino = self.inodes.get_or_assign(&full_path);
                let info = AttrInfo::File { size: 0 };
                reply.created(
                    &TTL,
                    &build_attr(ino, req.uid(), req.gid(), &info),
                    0,
                    0,
                    0,
                );
            }
            Err(err) => reply.error(op_errno("create", &full_path, &err)),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.known_path(parent) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(ENOENT);
            return;
        };
        let full_path = join_child(&parent_path, name);
        let ctx = self.ctx.clone();
        match self.runtime.block_on(create::mkdir(&ctx, &full_path)) {
            Ok(()) => {
                let ino = self.inodes.get_or_assign(&full_path);
                let info = AttrInfo::Dir { subfolder_count: 0 };
                reply.entry(&TTL, &build_attr(ino, req.uid(), req.gid(), &info), 0);
            }
            Err(err) => reply.error(op_errno("mkdir", &full_path, &err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.known_path(ino) else {
            reply.error(ENOENT);
            return;
        };
        let ctx = self.ctx.clone();
        match self
            .runtime
            .block_on(write::write(&ctx, &path, offset.max(0) as u64, data))
        {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(op_errno("write", &path, &err)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let Some(path) = self.known_path(ino) else {
            reply.ok();
            return;
        };
        let ctx = self.ctx.clone();
        match self.runtime.block_on(write::release(&ctx, &path)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(op_errno("release", &path, &err)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.known_path(parent) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(ENOENT);
            return;
        };
        let full_path = join_child(&parent_path, name);
        let ctx = self.ctx.clone();
        match self.runtime.block_on(delete::unlink(&ctx, &full_path)) {
            Ok(()) => {
                self.inodes.forget(&full_path);
                reply.ok();
            }
            Err(err) => reply.error(op_errno("unlink", &full_path, &err)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.known_path(parent) else {
            reply.error(ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(ENOENT);
            return;
        };
        let full_path = join_child(&parent_path, name);
        let ctx = self.ctx.clone();
        match self.runtime.block_on(delete::rmdir(&ctx, &full_path)) {
            Ok(()) => {
                self.inodes.forget(&full_path);
                reply.ok();
            }
            Err(err) => reply.error(op_errno("rmdir", &full_path, &err)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(parent_path), Some(new_parent_path)) =
            (self.known_path(parent), self.known_path(newparent))
        else {
            reply.error(ENOENT);
            return;
        };
        let (Some(name), Some(new_name)) = (name.to_str(), newname.to_str()) else {
            reply.error(ENOENT);
            return;
        };
        let old_path = join_child(&parent_path, name);
        let new_path = join_child(&new_parent_path, new_name);
        let ctx = self.ctx.clone();
        match self
            .runtime
            .block_on(rename::rename(&ctx, &old_path, &new_path, flags))
        {
            Ok(()) => {
                self.inodes.rekey(&old_path, &new_path);
                reply.ok();
            }
            Err(err) => reply.error(op_errno("rename", &old_path, &err)),
        }
    }
}
