//! FUSE driver layer: file records presented as a POSIX tree
//!
//! This module translates kernel filesystem requests into record-store
//! queries and builds the attribute/entry replies the kernel expects.
//!
//! # Architecture
//!
//! - `SqlFs`: the filesystem itself; async operation core plus the
//!   `fuser::Filesystem` bridge
//! - `FileNode` / `NodeTable`: per-inode state (content cache, mutation
//!   lock, child map) in a root-owned table
//! - `DirStream`: snapshot directory enumeration with synthetic `.`/`..`
//! - inode numbering: `ino = record id + 10_000`, bijective over the
//!   persisted domain
//!
//! # Consistency
//!
//! Nodes are pure cache; the backing rows are authoritative. Each node
//! carries a mutation lock held for the full duration of any mutating
//! operation, but no lock ever spans two nodes, so rename's
//! delete-target/update-source pair is not atomic. Callers must not rely
//! on atomic rename.

mod dir_stream;
mod error;
mod inode;
mod mount;
mod node;
mod sql_fs;

pub use dir_stream::{DirEntry, DirStream};
pub use error::FsError;
pub use inode::{inode_for, record_id, INODE_OFFSET};
pub use mount::mount;
pub use node::{FileNode, NodeTable};
pub use sql_fs::{AttrChanges, SqlFs};
