//! Inode numbering and attribute construction
//!
//! Kernel-visible inode numbers are derived from record primary keys by a
//! fixed offset, keeping everything below the offset reserved for
//! synthetic use (the root sits at `FUSE_ROOT_ID`). The mapping is stable
//! and invertible, so an inode number alone is enough to address a row.

use std::time::SystemTime;

use fuser::{FileAttr, FileType, FUSE_ROOT_ID};

use crate::database::{FileKind, FileRecord};
use crate::fuse::error::FsError;

/// Added to every record id to form its inode number
pub const INODE_OFFSET: u64 = 10_000;

/// Fixed size reported for directories
const DIR_SIZE: u64 = 4096;

/// Permission bits used when a directory row carries none
const DIR_FALLBACK_PERM: u16 = 0o755;

const BLKSIZE: u32 = 512;

/// Inode number for a persisted record
pub fn inode_for(id: i64) -> u64 {
    id as u64 + INODE_OFFSET
}

/// Record primary key for a kernel-supplied inode number.
///
/// `FUSE_ROOT_ID` maps to the synthetic root key 0; anything else below
/// the offset is not ours.
pub fn record_id(ino: u64) -> Result<i64, FsError> {
    if ino == FUSE_ROOT_ID {
        Ok(0)
    } else if ino >= INODE_OFFSET {
        Ok((ino - INODE_OFFSET) as i64)
    } else {
        Err(FsError::InvalidInode(ino))
    }
}

impl From<FileKind> for FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::File => FileType::RegularFile,
            FileKind::Directory => FileType::Directory,
        }
    }
}

/// Build the kernel attribute reply for a record.
///
/// Directories get a fixed size and a fallback permission set so the reply
/// is a valid directory entry even when the stored mode carries nothing
/// but the format bit.
pub fn record_attr(record: &FileRecord) -> FileAttr {
    let kind = FileType::from(record.kind);
    let perm = (record.mode & 0o7777) as u16;

    let (size, perm, nlink) = match record.kind {
        FileKind::Directory => {
            let perm = if perm == 0 { DIR_FALLBACK_PERM } else { perm };
            (DIR_SIZE, perm, 2)
        }
        FileKind::File => (record.content_len(), perm, 1),
    };

    let create_time = SystemTime::from(record.create_time);
    let update_time = SystemTime::from(record.update_time);

    FileAttr {
        ino: inode_for(record.id),
        size,
        blocks: size.div_ceil(BLKSIZE as u64),
        atime: create_time,
        mtime: update_time,
        ctime: create_time,
        crtime: create_time,
        kind,
        perm,
        nlink,
        uid: record.uid,
        gid: record.gid,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}

/// Attributes for the synthetic root, which has no backing row
pub fn root_attr() -> FileAttr {
    FileAttr {
        ino: FUSE_ROOT_ID,
        size: DIR_SIZE,
        blocks: DIR_SIZE / BLKSIZE as u64,
        atime: SystemTime::UNIX_EPOCH,
        mtime: SystemTime::UNIX_EPOCH,
        ctime: SystemTime::UNIX_EPOCH,
        crtime: SystemTime::UNIX_EPOCH,
        kind: FileType::Directory,
        perm: DIR_FALLBACK_PERM,
        nlink: 2,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}
