//! End-to-end tests for the filesystem operation core
//!
//! These exercise the async operations directly against a scratch SQLite
//! database, without an actual kernel mount (which requires privileges).
//! The `fuser::Filesystem` impl is a thin bridge over the same methods.

#![cfg(feature = "fuse")]

use std::time::{Duration, SystemTime};

use fuser::{FileType, FUSE_ROOT_ID};
use tempfile::TempDir;
use url::Url;

use sqlfs::fuse::{AttrChanges, FsError, INODE_OFFSET};
use sqlfs::{Database, SqlFs};

async fn setup_fs() -> (SqlFs, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db_url = format!("sqlite://{}", db_path.display());
    let db = Database::connect(&Url::parse(&db_url).unwrap())
        .await
        .unwrap();

    let fs = SqlFs::new(db, tokio::runtime::Handle::current(), Duration::from_secs(1));
    (fs, temp_dir)
}

#[tokio::test]
async fn test_create_then_lookup() {
    let (fs, _temp_dir) = setup_fs().await;

    let created = fs
        .create_file(FUSE_ROOT_ID, "a.txt", 0o644, 1000, 1000)
        .await
        .unwrap();
    // First insert gets id 1
    assert_eq!(created.ino, INODE_OFFSET + 1);
    assert_eq!(created.kind, FileType::RegularFile);
    assert_eq!(created.size, 0);
    assert_eq!(created.uid, 1000);

    let found = fs.lookup_entry(FUSE_ROOT_ID, "a.txt").await.unwrap();
    assert_eq!(found.ino, created.ino);
    assert_eq!(found.kind, FileType::RegularFile);
}

#[tokio::test]
async fn test_mkdir_then_lookup() {
    let (fs, _temp_dir) = setup_fs().await;

    let created = fs
        .make_dir(FUSE_ROOT_ID, "docs", 0o755, 1000, 1000)
        .await
        .unwrap();
    assert_eq!(created.kind, FileType::Directory);

    let found = fs.lookup_entry(FUSE_ROOT_ID, "docs").await.unwrap();
    assert_eq!(found.ino, created.ino);
    assert_eq!(found.kind, FileType::Directory);
}

#[tokio::test]
async fn test_lookup_miss_is_not_found() {
    let (fs, _temp_dir) = setup_fs().await;

    let err = fs.lookup_entry(FUSE_ROOT_ID, "ghost").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test]
async fn test_write_read_round_trip_with_zero_extension() {
    let (fs, _temp_dir) = setup_fs().await;

    let attr = fs
        .create_file(FUSE_ROOT_ID, "sparse.bin", 0o644, 0, 0)
        .await
        .unwrap();

    // Write 5 bytes at offset 10 into empty content
    let written = fs.write_at(attr.ino, 10, b"hello").await.unwrap();
    assert_eq!(written, 5);

    let content = fs.read_at(attr.ino, 0, 100).unwrap();
    assert_eq!(content.len(), 15);
    assert_eq!(&content[..10], &[0u8; 10]);
    assert_eq!(&content[10..], b"hello");

    assert_eq!(fs.read_at(attr.ino, 10, 5).unwrap(), b"hello");

    // The write persisted: attributes see the new size
    assert_eq!(fs.attr(attr.ino).await.unwrap().size, 15);
}

#[tokio::test]
async fn test_read_past_eof_is_empty_not_error() {
    let (fs, _temp_dir) = setup_fs().await;

    let attr = fs
        .create_file(FUSE_ROOT_ID, "short.txt", 0o644, 0, 0)
        .await
        .unwrap();
    fs.write_at(attr.ino, 0, b"hi").await.unwrap();

    assert_eq!(fs.read_at(attr.ino, 0, 10).unwrap(), b"hi");
    assert!(fs.read_at(attr.ino, 100, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_open_refreshes_content_cache() {
    let (fs, _temp_dir) = setup_fs().await;

    let attr = fs
        .create_file(FUSE_ROOT_ID, "cached.txt", 0o644, 0, 0)
        .await
        .unwrap();
    fs.write_at(attr.ino, 0, b"fresh").await.unwrap();

    fs.open_node(attr.ino).await.unwrap();
    assert_eq!(fs.read_at(attr.ino, 0, 100).unwrap(), b"fresh");
}

#[tokio::test]
async fn test_listing_scenario() {
    let (fs, _temp_dir) = setup_fs().await;

    // root contains docs (id 1) containing readme.txt (id 2, "hi")
    let docs = fs
        .make_dir(FUSE_ROOT_ID, "docs", 0o755, 0, 0)
        .await
        .unwrap();
    let readme = fs
        .create_file(docs.ino, "readme.txt", 0o644, 0, 0)
        .await
        .unwrap();
    fs.write_at(readme.ino, 0, b"hi").await.unwrap();

    let stream = fs.read_dir(docs.ino).await.unwrap();
    let names: Vec<_> = stream
        .entries_from(0)
        .map(|(_, e)| e.name.clone())
        .collect();
    assert_eq!(names, [".", "..", "readme.txt"]);

    let entries: Vec<_> = stream.entries_from(0).map(|(_, e)| e.clone()).collect();
    assert_eq!(entries[1].ino, FUSE_ROOT_ID);
    assert_eq!(entries[2].ino, INODE_OFFSET + 2);

    // Reading more than available yields exactly the content
    assert_eq!(fs.read_at(readme.ino, 0, 10).unwrap(), b"hi");
}

#[tokio::test]
async fn test_populate_is_idempotent() {
    let (fs, _temp_dir) = setup_fs().await;

    fs.create_file(FUSE_ROOT_ID, "a", 0o644, 0, 0).await.unwrap();
    fs.create_file(FUSE_ROOT_ID, "b", 0o644, 0, 0).await.unwrap();

    fs.populate(FUSE_ROOT_ID).await.unwrap();
    fs.populate(FUSE_ROOT_ID).await.unwrap();

    let root = fs.node_table().root();
    let mut names = root.child_names();
    names.sort();
    assert_eq!(names, ["a", "b"]);
    // root + two children, no duplicates
    assert_eq!(fs.node_table().len(), 3);
}

#[tokio::test]
async fn test_delete_then_lookup() {
    let (fs, _temp_dir) = setup_fs().await;

    fs.create_file(FUSE_ROOT_ID, "readme.txt", 0o644, 0, 0)
        .await
        .unwrap();
    fs.remove_file(FUSE_ROOT_ID, "readme.txt").await.unwrap();

    let err = fs
        .lookup_entry(FUSE_ROOT_ID, "readme.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_duplicate_create_rejected() {
    let (fs, _temp_dir) = setup_fs().await;

    fs.create_file(FUSE_ROOT_ID, "dup.txt", 0o644, 0, 0)
        .await
        .unwrap();
    let err = fs
        .create_file(FUSE_ROOT_ID, "dup.txt", 0o644, 0, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists(_)));
    assert_eq!(err.errno(), libc::EEXIST);
}

#[tokio::test]
async fn test_unlink_refuses_directories_and_rmdir_refuses_files() {
    let (fs, _temp_dir) = setup_fs().await;

    fs.make_dir(FUSE_ROOT_ID, "dir", 0o755, 0, 0).await.unwrap();
    fs.create_file(FUSE_ROOT_ID, "file", 0o644, 0, 0)
        .await
        .unwrap();

    let err = fs.remove_file(FUSE_ROOT_ID, "dir").await.unwrap_err();
    assert!(matches!(err, FsError::IsADirectory(_)));

    let err = fs.remove_dir(FUSE_ROOT_ID, "file").await.unwrap_err();
    assert!(matches!(err, FsError::NotADirectory(_)));
}

#[tokio::test]
async fn test_rmdir_requires_empty_directory() {
    let (fs, _temp_dir) = setup_fs().await;

    let docs = fs
        .make_dir(FUSE_ROOT_ID, "docs", 0o755, 0, 0)
        .await
        .unwrap();
    fs.create_file(docs.ino, "readme.txt", 0o644, 0, 0)
        .await
        .unwrap();

    let err = fs.remove_dir(FUSE_ROOT_ID, "docs").await.unwrap_err();
    assert!(matches!(err, FsError::NotEmpty(_)));
    assert_eq!(err.errno(), libc::ENOTEMPTY);

    fs.remove_file(docs.ino, "readme.txt").await.unwrap();
    fs.remove_dir(FUSE_ROOT_ID, "docs").await.unwrap();

    let err = fs.lookup_entry(FUSE_ROOT_ID, "docs").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_rename_within_directory() {
    let (fs, _temp_dir) = setup_fs().await;

    let old = fs
        .create_file(FUSE_ROOT_ID, "old.txt", 0o644, 0, 0)
        .await
        .unwrap();
    fs.rename_entry(FUSE_ROOT_ID, "old.txt", FUSE_ROOT_ID, "new.txt")
        .await
        .unwrap();

    let found = fs.lookup_entry(FUSE_ROOT_ID, "new.txt").await.unwrap();
    assert_eq!(found.ino, old.ino);

    let err = fs.lookup_entry(FUSE_ROOT_ID, "old.txt").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_rename_overwrite_across_directories() {
    let (fs, _temp_dir) = setup_fs().await;

    let dir_a = fs.make_dir(FUSE_ROOT_ID, "A", 0o755, 0, 0).await.unwrap();
    let dir_b = fs.make_dir(FUSE_ROOT_ID, "B", 0o755, 0, 0).await.unwrap();

    let x = fs.create_file(dir_a.ino, "x", 0o644, 0, 0).await.unwrap();
    fs.write_at(x.ino, 0, b"from x").await.unwrap();
    let y = fs.create_file(dir_b.ino, "y", 0o600, 0, 0).await.unwrap();
    fs.write_at(y.ino, 0, b"old y").await.unwrap();

    fs.rename_entry(dir_a.ino, "x", dir_b.ino, "y").await.unwrap();

    // B/y is now the pre-rename A/x
    let moved = fs.lookup_entry(dir_b.ino, "y").await.unwrap();
    assert_eq!(moved.ino, x.ino);
    fs.open_node(moved.ino).await.unwrap();
    assert_eq!(fs.read_at(moved.ino, 0, 100).unwrap(), b"from x");

    // A/x is gone, and A has no entry named x
    let err = fs.lookup_entry(dir_a.ino, "x").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
    let names: Vec<_> = fs
        .read_dir(dir_a.ino)
        .await
        .unwrap()
        .entries_from(0)
        .map(|(_, e)| e.name.clone())
        .collect();
    assert_eq!(names, [".", ".."]);

    // The overwritten destination row is gone too
    let err = fs.attr(y.ino).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test]
async fn test_rename_onto_itself_keeps_entry() {
    let (fs, _temp_dir) = setup_fs().await;

    let attr = fs
        .create_file(FUSE_ROOT_ID, "same.txt", 0o644, 0, 0)
        .await
        .unwrap();
    fs.write_at(attr.ino, 0, b"payload").await.unwrap();

    fs.rename_entry(FUSE_ROOT_ID, "same.txt", FUSE_ROOT_ID, "same.txt")
        .await
        .unwrap();

    let found = fs.lookup_entry(FUSE_ROOT_ID, "same.txt").await.unwrap();
    assert_eq!(found.ino, attr.ino);
    fs.open_node(found.ino).await.unwrap();
    assert_eq!(fs.read_at(found.ino, 0, 100).unwrap(), b"payload");
}

#[tokio::test]
async fn test_rename_missing_source() {
    let (fs, _temp_dir) = setup_fs().await;

    let err = fs
        .rename_entry(FUSE_ROOT_ID, "ghost", FUSE_ROOT_ID, "other")
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_setattr_applies_only_supplied_fields() {
    let (fs, _temp_dir) = setup_fs().await;

    let attr = fs
        .create_file(FUSE_ROOT_ID, "meta.txt", 0o644, 1000, 1000)
        .await
        .unwrap();

    let updated = fs
        .set_attr(
            attr.ino,
            AttrChanges {
                mode: Some(0o600),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.perm, 0o600);
    assert_eq!(updated.uid, 1000);
    assert_eq!(updated.gid, 1000);

    let updated = fs
        .set_attr(
            attr.ino,
            AttrChanges {
                uid: Some(0),
                gid: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.perm, 0o600);
    assert_eq!(updated.uid, 0);
    assert_eq!(updated.gid, 0);
}

#[tokio::test]
async fn test_setattr_persists_explicit_mtime() {
    let (fs, _temp_dir) = setup_fs().await;

    let attr = fs
        .create_file(FUSE_ROOT_ID, "stamped.txt", 0o644, 0, 0)
        .await
        .unwrap();

    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    let updated = fs
        .set_attr(
            attr.ino,
            AttrChanges {
                mtime: Some(mtime),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.mtime, mtime);

    // Survives a round trip through the store
    let reread = fs.attr(attr.ino).await.unwrap();
    let secs = |t: SystemTime| t.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs();
    assert_eq!(secs(reread.mtime), 1_600_000_000);
}

#[tokio::test]
async fn test_truncate_and_extend_via_setattr() {
    let (fs, _temp_dir) = setup_fs().await;

    let attr = fs
        .create_file(FUSE_ROOT_ID, "sized.txt", 0o644, 0, 0)
        .await
        .unwrap();
    fs.write_at(attr.ino, 0, b"hello world").await.unwrap();

    let truncated = fs
        .set_attr(
            attr.ino,
            AttrChanges {
                size: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(truncated.size, 5);
    assert_eq!(fs.read_at(attr.ino, 0, 100).unwrap(), b"hello");

    let extended = fs
        .set_attr(
            attr.ino,
            AttrChanges {
                size: Some(8),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(extended.size, 8);
    assert_eq!(fs.read_at(attr.ino, 0, 100).unwrap(), b"hello\0\0\0");
}

#[tokio::test]
async fn test_root_attr_is_synthetic_directory() {
    let (fs, _temp_dir) = setup_fs().await;

    let attr = fs.attr(FUSE_ROOT_ID).await.unwrap();
    assert_eq!(attr.ino, FUSE_ROOT_ID);
    assert_eq!(attr.kind, FileType::Directory);

    // Listing the root synthesizes `.` and `..` pointing at itself
    let names: Vec<_> = fs
        .read_dir(FUSE_ROOT_ID)
        .await
        .unwrap()
        .entries_from(0)
        .map(|(_, e)| (e.name.clone(), e.ino))
        .collect();
    assert_eq!(names[0], (".".to_string(), FUSE_ROOT_ID));
    assert_eq!(names[1], ("..".to_string(), FUSE_ROOT_ID));
}
