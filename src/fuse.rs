use std::{
    ffi::OsStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use fuser::{FileAttr, FileType, Filesystem};

use crate::{
    block::{BLOCK_SIZE, storage::Storage},
    fs::{
        self, Stat,
        node::{NAME_MAX_LEN, NodeId},
    },
    kernel::{Kernel, file::FileId},
};

/// How long the kernel should cache node attributes
const TTL: Duration = Duration::from_secs(1);

/// Exposes the flat namespace as the root directory of a FUSE mount.
///
/// Every FUSE file handle is an open file in the kernel's open file table, so a file unlinked
/// while mounted processes still hold it open stays readable and writable until it is released.
pub struct Fuse<S: Storage> {
    kernel: Kernel<S>,
}

impl<S: Storage> Fuse<S> {
    pub fn new(kernel: Kernel<S>) -> Self {
        Self { kernel }
    }

    fn stat(&self, id: NodeId) -> fs::error::Result<Stat> {
        self.kernel.with_fs(|fs| fs.stat(id))
    }
}

impl<S: Storage> Filesystem for Fuse<S> {
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        if NodeId::new(parent) != NodeId::ROOT {
            return reply.error(libc::ENOTDIR);
        }
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        let res = self.kernel.with_fs(|fs| {
            let id = fs.lookup(name)?;
            fs.stat(id)
        });
        match res {
            Ok(stat) => reply.entry(&TTL, &file_attr(&stat), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let id = NodeId::new(ino);
        if id == NodeId::ROOT {
            return reply.attr(&TTL, &root_attr());
        }
        match self.stat(id) {
            Ok(stat) => reply.attr(&TTL, &file_attr(&stat)),
            Err(e) => reply.error(e.into()),
        }
    }

    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let id = NodeId::new(ino);
        if id == NodeId::ROOT {
            return reply.attr(&TTL, &root_attr());
        }
        let res = self.kernel.with_fs(|fs| {
            if let Some(size) = size {
                fs.truncate(id, size)?;
            }
            fs.stat(id)
        });
        match res {
            Ok(stat) => reply.attr(&TTL, &file_attr(&stat)),
            Err(e) => reply.error(e.into()),
        }
    }

    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        if NodeId::new(parent) != NodeId::ROOT {
            return reply.error(libc::ENOTDIR);
        }
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        // Only regular files live in the namespace
        if mode & libc::S_IFMT as u32 != libc::S_IFREG as u32 {
            return reply.error(libc::EINVAL);
        }

        let file = match self.kernel.open_file(name, true) {
            Ok(file) => file,
            Err(e) => return reply.error(e.into()),
        };
        let res = self
            .kernel
            .file_node(file)
            .and_then(|id| self.stat(id).map_err(Into::into));
        match res {
            Ok(stat) => reply.created(&TTL, &file_attr(&stat), 0, file.get(), 0),
            Err(e) => {
                if let Err(err) = self.kernel.release_file(file) {
                    log::warn!("failed to release {:?}: {:?}", file, err);
                }
                reply.error(e.into())
            }
        }
    }

    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        match self.kernel.open_node(NodeId::new(ino)) {
            Ok(file) => reply.opened(file.get(), 0),
            Err(e) => reply.error(e.into()),
        }
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        let mut buf = vec![0u8; size as usize];
        match self.kernel.read_file_at(FileId::new(fh), offset, &mut buf) {
            Ok(read) => reply.data(&buf[..read]),
            Err(e) => reply.error(e.into()),
        }
    }

    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        match self.kernel.write_file_at(FileId::new(fh), offset, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e.into()),
        }
    }

    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        match self.kernel.release_file(FileId::new(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        if NodeId::new(parent) != NodeId::ROOT {
            return reply.error(libc::ENOTDIR);
        }
        let name = match name.to_str() {
            Some(name) => name,
            None => return reply.error(libc::EILSEQ),
        };
        match self.kernel.unlink(name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.into()),
        }
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        if NodeId::new(ino) != NodeId::ROOT {
            return reply.error(libc::ENOTDIR);
        }

        let mut entries = vec![
            (NodeId::ROOT, FileType::Directory, ".".to_owned()),
            (NodeId::ROOT, FileType::Directory, "..".to_owned()),
        ];
        self.kernel.with_fs(|fs| {
            entries.extend(
                fs.entries()
                    .map(|(name, id)| (id, FileType::RegularFile, name.to_string())),
            )
        });

        for (i, (id, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            let is_full = reply.add(id.get(), (i + 1) as i64, *kind, name);
            if is_full {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let (blocks, blocks_free, files, files_free) = self.kernel.with_fs(|fs| {
            (
                fs.superblock().block_count,
                fs.available_blocks(),
                fs.superblock().node_count,
                fs.free_nodes(),
            )
        });

        reply.statfs(
            blocks,
            blocks_free,
            blocks_free,
            files,
            files_free,
            BLOCK_SIZE as u32,
            NAME_MAX_LEN as u32,
            0,
        );
    }
}

fn root_attr() -> FileAttr {
    FileAttr {
        ino: NodeId::ROOT.get(),
        size: 0,
        blocks: 0,
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind: FileType::Directory,
        perm: 0o777,
        nlink: 2,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: BLOCK_SIZE as u32,
        flags: 0,
    }
}

fn file_attr(stat: &Stat) -> FileAttr {
    FileAttr {
        ino: stat.id.get(),
        size: stat.size,
        blocks: stat.blocks,
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind: FileType::RegularFile,
        perm: 0o666,
        nlink: u32::from(stat.name.is_some()),
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: BLOCK_SIZE as u32,
        flags: 0,
    }
}
