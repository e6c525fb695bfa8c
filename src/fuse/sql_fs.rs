//! The filesystem: record-store calls on one side, kernel replies on the
//! other
//!
//! `SqlFs` carries an async operation core (everything talking to the
//! store) plus a thin synchronous `fuser::Filesystem` bridge. fuser
//! dispatches callbacks on its own thread, so each bridge method hops onto
//! the tokio runtime with `Handle::block_on`.
//!
//! Mutating operations hold the affected node's mutation lock for their
//! full duration; structural operations (create, mkdir, unlink, rmdir,
//! rename) lock the parent directory's node. Read-side operations take no
//! lock and may observe an in-flight mutation's intermediate state
//! between two store calls.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow, FUSE_ROOT_ID,
};
use libc::c_int;
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::database::{Database, FileKind, FileRecord, NewFileRecord};
use crate::fuse::dir_stream::DirStream;
use crate::fuse::error::{is_unique_violation, FsError};
use crate::fuse::inode::{inode_for, record_attr, record_id, root_attr};
use crate::fuse::node::{FileNode, NodeTable};

/// Attribute fields a setattr request may carry; unset fields are left
/// untouched on the record.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttrChanges {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mtime: Option<SystemTime>,
    pub size: Option<u64>,
}

/// A table of file records mounted as a filesystem
pub struct SqlFs {
    db: Database,
    rt: tokio::runtime::Handle,
    nodes: NodeTable,
    ttl: Duration,
}

impl SqlFs {
    /// Build the filesystem over `db`. `rt` is the runtime the store
    /// calls run on; `ttl` is handed to the kernel with every attribute
    /// and entry reply.
    pub fn new(db: Database, rt: tokio::runtime::Handle, ttl: Duration) -> Self {
        Self {
            db,
            rt,
            nodes: NodeTable::new(),
            ttl,
        }
    }

    pub fn node_table(&self) -> &NodeTable {
        &self.nodes
    }

    fn parent_ino_of(record: &FileRecord) -> u64 {
        if record.parent_dir == 0 {
            FUSE_ROOT_ID
        } else {
            inode_for(record.parent_dir)
        }
    }

    /// Node for `ino`, rebuilt from the store when the kernel knows the
    /// inode but we hold no node for it.
    async fn node_for(&self, ino: u64) -> Result<Arc<FileNode>, FsError> {
        if let Some(node) = self.nodes.get(ino) {
            return Ok(node);
        }
        let pk = record_id(ino)?;
        let record = self
            .db
            .find_file(pk)
            .await?
            .ok_or(FsError::InvalidInode(ino))?;
        Ok(self
            .nodes
            .get_or_insert(ino, pk, Self::parent_ino_of(&record)))
    }

    /// Re-fetch a node's backing row; the row vanishing under a live node
    /// is an I/O error, not a lookup miss.
    async fn fetch_record(&self, pk: i64) -> Result<FileRecord, FsError> {
        self.db.find_file(pk).await?.ok_or(FsError::Vanished(pk))
    }

    /// Materialize a directory's children into the node table.
    ///
    /// Idempotent: children already registered are left alone, so
    /// re-entrant kernel calls never duplicate work. Non-directories are
    /// a no-op.
    pub async fn populate(&self, dir_ino: u64) -> Result<(), FsError> {
        let dir = self.node_for(dir_ino).await?;
        if dir.pk != 0 {
            let record = self.fetch_record(dir.pk).await?;
            if !record.kind.is_dir() {
                return Ok(());
            }
        }

        let children = self.db.list_children(dir.pk).await?;
        for child in children {
            if dir.child(&child.name).is_some() {
                continue;
            }
            let ino = inode_for(child.id);
            let node = self.nodes.get_or_insert(ino, child.id, dir_ino);
            if child.kind == FileKind::File {
                node.set_content(child.content_bytes().to_vec());
            }
            dir.register_child(&child.name, ino);
        }
        Ok(())
    }

    /// Resolve `name` under the directory at `parent_ino`
    pub async fn lookup_entry(&self, parent_ino: u64, name: &str) -> Result<FileAttr, FsError> {
        let parent = self.node_for(parent_ino).await?;
        let record = self
            .db
            .find_child(parent.pk, name)
            .await?
            .ok_or_else(|| FsError::NotFound(name.to_owned()))?;

        let ino = inode_for(record.id);
        self.nodes.get_or_insert(ino, record.id, parent_ino);
        parent.register_child(name, ino);
        Ok(record_attr(&record))
    }

    /// Attribute snapshot for an inode
    pub async fn attr(&self, ino: u64) -> Result<FileAttr, FsError> {
        if ino == FUSE_ROOT_ID {
            return Ok(root_attr());
        }
        let node = self.node_for(ino).await?;
        let record = self.fetch_record(node.pk).await?;
        Ok(record_attr(&record))
    }

    /// Apply the supplied attribute changes and return the refreshed
    /// snapshot. A size change truncates or zero-extends the content.
    pub async fn set_attr(&self, ino: u64, changes: AttrChanges) -> Result<FileAttr, FsError> {
        if ino == FUSE_ROOT_ID {
            // The root has no backing row; nothing to persist.
            return Ok(root_attr());
        }
        let node = self.node_for(ino).await?;
        let _guard = node.lock().await;

        let mut record = self.fetch_record(node.pk).await?;
        if let Some(mode) = changes.mode {
            record.mode = mode;
        }
        if let Some(uid) = changes.uid {
            record.uid = uid;
        }
        if let Some(gid) = changes.gid {
            record.gid = gid;
        }
        if let Some(size) = changes.size {
            let mut content = record.content.take().unwrap_or_default();
            content.resize(size as usize, 0);
            record.content = Some(content);
        }
        match changes.mtime {
            Some(mtime) => record.update_time = OffsetDateTime::from(mtime),
            None => record.touch(),
        }

        self.db.update_file(&record).await?;
        if record.kind == FileKind::File && changes.size.is_some() {
            node.set_content(record.content_bytes().to_vec());
        }
        Ok(record_attr(&record))
    }

    /// Refresh the node's content cache from the store
    pub async fn open_node(&self, ino: u64) -> Result<(), FsError> {
        if ino == FUSE_ROOT_ID {
            return Ok(());
        }
        let node = self.node_for(ino).await?;
        let record = self.fetch_record(node.pk).await?;
        if record.kind == FileKind::File {
            node.set_content(record.content_bytes().to_vec());
        }
        Ok(())
    }

    /// Read from the cached content; no store access. Reads past the end
    /// of the content yield an empty result.
    pub fn read_at(&self, ino: u64, offset: i64, size: u32) -> Result<Vec<u8>, FsError> {
        let node = self.nodes.get(ino).ok_or(FsError::InvalidInode(ino))?;
        Ok(node.content_slice(offset.max(0) as u64, size))
    }

    /// Write `data` at `offset`, zero-extending the content when the
    /// write lands past its current end. The full new content is
    /// persisted before the call returns.
    pub async fn write_at(&self, ino: u64, offset: i64, data: &[u8]) -> Result<u32, FsError> {
        let node = self.node_for(ino).await?;
        let _guard = node.lock().await;

        let mut record = self.fetch_record(node.pk).await?;
        let offset = offset.max(0) as usize;
        let end = offset + data.len();

        let mut content = record.content.take().unwrap_or_default();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(data);
        record.content = Some(content);
        record.touch();

        self.db.update_file(&record).await?;
        node.set_content(record.content_bytes().to_vec());
        Ok(data.len() as u32)
    }

    /// Create a regular file under `parent_ino`
    pub async fn create_file(
        &self,
        parent_ino: u64,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<FileAttr, FsError> {
        self.create_entry(parent_ino, name, FileKind::File, mode, uid, gid)
            .await
    }

    /// Create a directory under `parent_ino`
    pub async fn make_dir(
        &self,
        parent_ino: u64,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<FileAttr, FsError> {
        self.create_entry(parent_ino, name, FileKind::Directory, mode, uid, gid)
            .await
    }

    async fn create_entry(
        &self,
        parent_ino: u64,
        name: &str,
        kind: FileKind,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<FileAttr, FsError> {
        let parent = self.node_for(parent_ino).await?;
        let _guard = parent.lock().await;

        if self.db.find_child(parent.pk, name).await?.is_some() {
            return Err(FsError::AlreadyExists(name.to_owned()));
        }

        let (format, content) = match kind {
            FileKind::File => (libc::S_IFREG as u32, Some(Vec::new())),
            FileKind::Directory => (libc::S_IFDIR as u32, None),
        };
        let new = NewFileRecord {
            name: name.to_owned(),
            kind,
            parent_dir: parent.pk,
            mode: mode | format,
            uid,
            gid,
            content,
        };

        // The store's (parent_dir, name) constraint closes the race left
        // open by the check above when another process creates the same
        // name in between.
        let record = match self.db.insert_file(new).await {
            Ok(record) => record,
            Err(err) if is_unique_violation(&err) => {
                return Err(FsError::AlreadyExists(name.to_owned()))
            }
            Err(err) => return Err(err.into()),
        };

        let ino = inode_for(record.id);
        self.nodes.get_or_insert(ino, record.id, parent_ino);
        parent.register_child(name, ino);
        Ok(record_attr(&record))
    }

    /// Remove the regular file `name` under `parent_ino`
    pub async fn remove_file(&self, parent_ino: u64, name: &str) -> Result<(), FsError> {
        let parent = self.node_for(parent_ino).await?;
        let _guard = parent.lock().await;

        let record = self
            .db
            .find_child(parent.pk, name)
            .await?
            .ok_or_else(|| FsError::NotFound(name.to_owned()))?;
        if record.kind.is_dir() {
            return Err(FsError::IsADirectory(name.to_owned()));
        }

        self.db.delete_file(record.id).await?;
        parent.forget_child(name);
        Ok(())
    }

    /// Remove the directory `name` under `parent_ino`. The directory must
    /// be empty; deleting it otherwise would orphan its children's rows.
    pub async fn remove_dir(&self, parent_ino: u64, name: &str) -> Result<(), FsError> {
        let parent = self.node_for(parent_ino).await?;
        let _guard = parent.lock().await;

        let record = self
            .db
            .find_child(parent.pk, name)
            .await?
            .ok_or_else(|| FsError::NotFound(name.to_owned()))?;
        if !record.kind.is_dir() {
            return Err(FsError::NotADirectory(name.to_owned()));
        }
        if !self.db.list_children(record.id).await?.is_empty() {
            return Err(FsError::NotEmpty(name.to_owned()));
        }

        self.db.delete_file(record.id).await?;
        parent.forget_child(name);
        Ok(())
    }

    /// Move `parent/name` to `new_parent/new_name`, silently replacing an
    /// existing destination entry.
    ///
    /// The replace-then-move pair is two independent store calls; a
    /// conflicting operation between them can observe the destination
    /// deleted with the source not yet moved.
    pub async fn rename_entry(
        &self,
        parent_ino: u64,
        name: &str,
        new_parent_ino: u64,
        new_name: &str,
    ) -> Result<(), FsError> {
        let parent = self.node_for(parent_ino).await?;
        let new_parent = self.node_for(new_parent_ino).await?;
        let _guard = parent.lock().await;

        let mut record = self
            .db
            .find_child(parent.pk, name)
            .await?
            .ok_or_else(|| FsError::NotFound(name.to_owned()))?;

        // The overwrite target lives under the destination parent, not
        // the source's. Renaming an entry onto itself replaces nothing.
        if let Some(target) = self.db.find_child(new_parent.pk, new_name).await? {
            if target.id != record.id {
                self.db.delete_file(target.id).await?;
                new_parent.forget_child(new_name);
                self.nodes.remove(inode_for(target.id));
            }
        }

        record.name = new_name.to_owned();
        record.parent_dir = new_parent.pk;
        record.touch();
        self.db.update_file(&record).await?;

        parent.forget_child(name);
        let ino = inode_for(record.id);
        new_parent.register_child(new_name, ino);
        if let Some(node) = self.nodes.get(ino) {
            node.set_parent(new_parent_ino);
        }
        Ok(())
    }

    /// Snapshot the entries of the directory at `ino`
    pub async fn read_dir(&self, ino: u64) -> Result<DirStream, FsError> {
        let dir = self.node_for(ino).await?;
        if dir.pk != 0 {
            let record = self.fetch_record(dir.pk).await?;
            if !record.kind.is_dir() {
                return Err(FsError::NotADirectory(record.name));
            }
        }
        let children = self.db.list_children(dir.pk).await?;
        Ok(DirStream::new(ino, dir.parent(), &children))
    }
}

/// Log a failed operation and hand back its errno.
///
/// Lookup misses and other expected refusals stay at debug; store
/// failures surface as EIO and are logged as errors.
fn log_errno(op: &'static str, err: FsError) -> c_int {
    let errno = err.errno();
    if errno == libc::EIO {
        error!(op, error = %err, "filesystem operation failed");
    } else {
        debug!(op, error = %err, "filesystem request refused");
    }
    errno
}

fn os_name(name: &OsStr) -> Result<&str, c_int> {
    name.to_str().ok_or(libc::EINVAL)
}

impl Filesystem for SqlFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = match os_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.rt.block_on(self.lookup_entry(parent, name)) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(err) => reply.error(log_errno("lookup", err)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        self.nodes.remove(ino);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.rt.block_on(self.attr(ino)) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(err) => reply.error(log_errno("getattr", err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
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
        let changes = AttrChanges {
            mode,
            uid,
            gid,
            size,
            mtime: mtime.map(|t| match t {
                TimeOrNow::SpecificTime(time) => time,
                TimeOrNow::Now => SystemTime::now(),
            }),
        };
        match self.rt.block_on(self.set_attr(ino, changes)) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(err) => reply.error(log_errno("setattr", err)),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match os_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self
            .rt
            .block_on(self.make_dir(parent, name, mode, req.uid(), req.gid()))
        {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(err) => reply.error(log_errno("mkdir", err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match os_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.rt.block_on(self.remove_file(parent, name)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(log_errno("unlink", err)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match os_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self.rt.block_on(self.remove_dir(parent, name)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(log_errno("rmdir", err)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (name, newname) = match (os_name(name), os_name(newname)) {
            (Ok(name), Ok(newname)) => (name, newname),
            _ => return reply.error(libc::EINVAL),
        };
        match self
            .rt
            .block_on(self.rename_entry(parent, name, newparent, newname))
        {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(log_errno("rename", err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.rt.block_on(self.open_node(ino)) {
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(log_errno("open", err)),
        }
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
        match self.read_at(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(log_errno("read", err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
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
        match self.rt.block_on(self.write_at(ino, offset, data)) {
            Ok(written) => reply.written(written),
            Err(err) => reply.error(log_errno("write", err)),
        }
    }

    // Every write persists before returning, so there is no write-back
    // state left to flush or sync.
    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.rt.block_on(self.populate(ino)) {
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(log_errno("opendir", err)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let stream = match self.rt.block_on(self.read_dir(ino)) {
            Ok(stream) => stream,
            Err(err) => return reply.error(log_errno("readdir", err)),
        };
        for (next_offset, entry) in stream.entries_from(offset) {
            if reply.add(entry.ino, next_offset, entry.kind.into(), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match os_name(name) {
            Ok(name) => name,
            Err(errno) => return reply.error(errno),
        };
        match self
            .rt
            .block_on(self.create_file(parent, name, mode, req.uid(), req.gid()))
        {
            Ok(attr) => reply.created(&self.ttl, &attr, 0, 0, 0),
            Err(err) => reply.error(log_errno("create", err)),
        }
    }
}
