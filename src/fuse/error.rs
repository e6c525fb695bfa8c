use libc::c_int;

/// Errors surfaced by filesystem operations, each mapping to a POSIX errno.
///
/// `NotFound` is the expected outcome of a lookup miss and is never logged
/// as an error; store failures map to `EIO` and are.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such entry: {0}")]
    NotFound(String),
    #[error("entry already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("inode {0} does not map to a record")]
    InvalidInode(u64),
    #[error("record {0} vanished from the store")]
    Vanished(i64),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl FsError {
    /// The errno reported to the kernel for this error
    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::InvalidInode(_) => libc::ENOENT,
            FsError::Vanished(_) => libc::EIO,
            FsError::Store(_) => libc::EIO,
        }
    }
}

/// True when the store rejected an insert because of the
/// `(parent_dir, name)` uniqueness constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound("x".into()).errno(), libc::ENOENT);
        assert_eq!(FsError::AlreadyExists("x".into()).errno(), libc::EEXIST);
        assert_eq!(FsError::NotEmpty("x".into()).errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::InvalidInode(7).errno(), libc::ENOENT);
        assert_eq!(FsError::Vanished(7).errno(), libc::EIO);
        assert_eq!(
            FsError::Store(sqlx::Error::RowNotFound).errno(),
            libc::EIO
        );
    }
}
