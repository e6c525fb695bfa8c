// Library surface: database-backed record store plus the FUSE driver layer.
pub mod config;
pub mod database;
#[cfg(feature = "fuse")]
pub mod fuse;

// Re-exports for consumers (binary, tests)
pub use config::Config;
pub use database::models::{FileKind, FileRecord, NewFileRecord};
pub use database::Database;
#[cfg(feature = "fuse")]
pub use fuse::{FsError, SqlFs};
