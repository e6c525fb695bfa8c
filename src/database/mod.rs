//! Record store backing the filesystem
//!
//! One row per file or directory, held in a single `files` table. The FUSE
//! layer never talks to sqlx directly; everything goes through the query
//! methods on [`Database`].

use std::ops::Deref;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use url::Url;

pub mod models;

pub use models::{FileKind, FileRecord, NewFileRecord};

/// Schema for the backing table.
///
/// `id = 0` is reserved for the synthetic root and never inserted;
/// `parent_dir = 0` marks top-level entries. The `(parent_dir, name)`
/// uniqueness is enforced here so concurrent creators of the same name
/// cannot both succeed.
const FILES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    parent_dir INTEGER NOT NULL DEFAULT 0,
    content BLOB,
    mode INTEGER NOT NULL DEFAULT 0,
    uid INTEGER NOT NULL DEFAULT 0,
    gid INTEGER NOT NULL DEFAULT 0,
    create_time TIMESTAMP NOT NULL,
    update_time TIMESTAMP NOT NULL,
    UNIQUE (parent_dir, name)
)
"#;

/// Handle to the record store, cheaply cloneable
#[derive(Debug, Clone)]
pub struct Database(SqlitePool);

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Database {
    /// Connect to the store at `url`, creating the database file and the
    /// `files` table if they do not exist yet.
    pub async fn connect(url: &Url) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url.as_str())?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let db = Self(pool);
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(FILES_DDL).execute(&**self).await?;
        Ok(())
    }
}
