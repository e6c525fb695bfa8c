//! Per-inode state and the root-owned node table
//!
//! A [`FileNode`] is transient, kernel-cache-shaped state for one record:
//! the record's primary key, a lazily filled content cache, the set of
//! children the kernel has been told about, and the node's mutation lock.
//! Rows in the store stay authoritative; a node can always be rebuilt
//! from its inode number.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fuser::FUSE_ROOT_ID;
use parking_lot::RwLock;

/// In-memory state for one inode
#[derive(Debug)]
pub struct FileNode {
    /// Record primary key; 0 for the synthetic root
    pub pk: i64,
    /// Inode number of the parent directory (self for the root).
    /// Updated when the backing record is renamed into another directory.
    parent: AtomicU64,
    /// Cached content for regular files, refreshed on open and write.
    /// May be stale relative to the store between operations.
    content: RwLock<Vec<u8>>,
    /// Children registered under this directory: name → inode number
    children: RwLock<HashMap<String, u64>>,
    /// At most one in-flight mutation per node. Async because it is held
    /// across store calls.
    mutation: tokio::sync::Mutex<()>,
}

impl FileNode {
    pub fn new(pk: i64, parent: u64) -> Self {
        Self {
            pk,
            parent: AtomicU64::new(parent),
            content: RwLock::new(Vec::new()),
            children: RwLock::new(HashMap::new()),
            mutation: tokio::sync::Mutex::new(()),
        }
    }

    pub fn parent(&self) -> u64 {
        self.parent.load(Ordering::Acquire)
    }

    pub fn set_parent(&self, parent: u64) {
        self.parent.store(parent, Ordering::Release);
    }

    /// Acquire this node's mutation lock
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.mutation.lock().await
    }

    pub fn content(&self) -> Vec<u8> {
        self.content.read().clone()
    }

    pub fn content_len(&self) -> usize {
        self.content.read().len()
    }

    /// Slice `[offset, offset + size)` of the cached content, clamped to
    /// its length. Past-EOF reads yield an empty result, never an error.
    pub fn content_slice(&self, offset: u64, size: u32) -> Vec<u8> {
        let content = self.content.read();
        let start = (offset as usize).min(content.len());
        let end = (offset as usize).saturating_add(size as usize).min(content.len());
        content[start..end].to_vec()
    }

    pub fn set_content(&self, content: Vec<u8>) {
        *self.content.write() = content;
    }

    pub fn child(&self, name: &str) -> Option<u64> {
        self.children.read().get(name).copied()
    }

    pub fn register_child(&self, name: &str, ino: u64) {
        self.children.write().insert(name.to_string(), ino);
    }

    pub fn forget_child(&self, name: &str) -> Option<u64> {
        self.children.write().remove(name)
    }

    /// Names currently registered under this directory
    pub fn child_names(&self) -> Vec<String> {
        self.children.read().keys().cloned().collect()
    }
}

/// Inode number → node mapping, owned by the filesystem root.
///
/// Parent back-references are inode numbers into this table rather than
/// owning pointers, so the parent/child cycle never owns itself. The root
/// is pre-registered under `FUSE_ROOT_ID` with key 0 and is its own
/// parent.
#[derive(Debug)]
pub struct NodeTable {
    nodes: RwLock<HashMap<u64, Arc<FileNode>>>,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(FUSE_ROOT_ID, Arc::new(FileNode::new(0, FUSE_ROOT_ID)));
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    pub fn get(&self, ino: u64) -> Option<Arc<FileNode>> {
        self.nodes.read().get(&ino).cloned()
    }

    pub fn root(&self) -> Arc<FileNode> {
        self.get(FUSE_ROOT_ID).expect("root node is always registered")
    }

    /// Fetch the node for `ino`, materializing it if the kernel knows the
    /// inode but we have dropped (or never built) its node. Idempotent:
    /// an existing node is returned untouched.
    pub fn get_or_insert(&self, ino: u64, pk: i64, parent: u64) -> Arc<FileNode> {
        if let Some(node) = self.get(ino) {
            return node;
        }
        let mut nodes = self.nodes.write();
        nodes
            .entry(ino)
            .or_insert_with(|| Arc::new(FileNode::new(pk, parent)))
            .clone()
    }

    /// Drop a node once the kernel has forgotten the inode. The root is
    /// never dropped.
    pub fn remove(&self, ino: u64) -> Option<Arc<FileNode>> {
        if ino == FUSE_ROOT_ID {
            return None;
        }
        self.nodes.write().remove(&ino)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}
