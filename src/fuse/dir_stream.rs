//! Snapshot directory enumeration
//!
//! Built once per listing request: synthetic `.` and `..` entries followed
//! by the store's child list. The snapshot is finite and consumed
//! sequentially from a kernel-supplied offset; concurrent mutations are
//! not reflected.

use crate::database::{FileKind, FileRecord};
use crate::fuse::inode::inode_for;

/// One kernel-facing directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub kind: FileKind,
}

/// An immutable listing of a directory's entries
#[derive(Debug, Clone)]
pub struct DirStream {
    entries: Vec<DirEntry>,
}

impl DirStream {
    /// Snapshot `children` under the directory at `dir_ino` whose parent
    /// sits at `parent_ino`.
    pub fn new(dir_ino: u64, parent_ino: u64, children: &[FileRecord]) -> Self {
        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry {
            ino: dir_ino,
            name: ".".to_string(),
            kind: FileKind::Directory,
        });
        entries.push(DirEntry {
            ino: parent_ino,
            name: "..".to_string(),
            kind: FileKind::Directory,
        });
        for child in children {
            entries.push(DirEntry {
                ino: inode_for(child.id),
                name: child.name.clone(),
                kind: child.kind,
            });
        }
        Self { entries }
    }

    /// Entries from `offset` on, paired with the offset to resume at
    /// after each one.
    pub fn entries_from(&self, offset: i64) -> impl Iterator<Item = (i64, &DirEntry)> {
        self.entries
            .iter()
            .enumerate()
            .skip(offset.max(0) as usize)
            .map(|(i, entry)| (i as i64 + 1, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::fuse::inode::INODE_OFFSET;

    fn child(id: i64, name: &str, kind: FileKind) -> FileRecord {
        FileRecord {
            id,
            name: name.to_string(),
            kind,
            parent_dir: 1,
            content: None,
            mode: 0o644,
            uid: 0,
            gid: 0,
            create_time: OffsetDateTime::UNIX_EPOCH,
            update_time: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_synthetic_entries_come_first() {
        let children = [child(2, "readme.txt", FileKind::File)];
        let stream = DirStream::new(INODE_OFFSET + 1, fuser::FUSE_ROOT_ID, &children);

        let names: Vec<_> = stream
            .entries_from(0)
            .map(|(_, e)| e.name.as_str())
            .collect();
        assert_eq!(names, [".", "..", "readme.txt"]);

        let entries: Vec<_> = stream.entries_from(0).map(|(_, e)| e.clone()).collect();
        assert_eq!(entries[0].ino, INODE_OFFSET + 1);
        assert_eq!(entries[1].ino, fuser::FUSE_ROOT_ID);
        assert_eq!(entries[2].ino, INODE_OFFSET + 2);
        assert_eq!(entries[2].kind, FileKind::File);
    }

    #[test]
    fn test_offset_resumption() {
        let children = [
            child(2, "a", FileKind::File),
            child(3, "b", FileKind::Directory),
        ];
        let stream = DirStream::new(INODE_OFFSET + 1, fuser::FUSE_ROOT_ID, &children);
        assert_eq!(stream.len(), 4);

        // Resume mid-stream the way the kernel does after a full reply
        // buffer: the offset paired with each entry points at the next.
        let (next, entry) = stream.entries_from(0).next().unwrap();
        assert_eq!(entry.name, ".");
        assert_eq!(next, 1);

        let remaining: Vec<_> = stream.entries_from(3).map(|(_, e)| e.name.clone()).collect();
        assert_eq!(remaining, ["b"]);

        assert_eq!(stream.entries_from(4).count(), 0);
    }

    #[test]
    fn test_empty_directory_still_lists_dot_entries() {
        let stream = DirStream::new(INODE_OFFSET + 1, fuser::FUSE_ROOT_ID, &[]);
        let names: Vec<_> = stream
            .entries_from(0)
            .map(|(_, e)| e.name.as_str())
            .collect();
        assert_eq!(names, [".", ".."]);
    }
}
