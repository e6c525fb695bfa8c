use serde::{Deserialize, Serialize};
use sqlx::Row;
use time::OffsetDateTime;

use crate::database::Database;

/// Kind of a file record, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Directory => "directory",
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileKind::Directory)
    }
}

impl std::str::FromStr for FileKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "directory" => FileKind::Directory,
            _ => FileKind::File,
        })
    }
}

/// One row of the `files` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub kind: FileKind,
    /// Parent record id; 0 means "child of the synthetic root"
    pub parent_dir: i64,
    /// Payload for regular files, absent for directories
    pub content: Option<Vec<u8>>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub create_time: OffsetDateTime,
    pub update_time: OffsetDateTime,
}

impl FileRecord {
    pub fn content_bytes(&self) -> &[u8] {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn content_len(&self) -> u64 {
        self.content_bytes().len() as u64
    }

    /// Refresh `update_time` to now; called before persisting a mutation
    /// unless the caller supplies an explicit modification time.
    pub fn touch(&mut self) {
        self.update_time = OffsetDateTime::now_utc();
    }
}

/// Fields needed to insert a new record; id and timestamps are assigned
/// by the store.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub name: String,
    pub kind: FileKind,
    pub parent_dir: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub content: Option<Vec<u8>>,
}

impl Database {
    /// Fetch a record by primary key
    pub async fn find_file(&self, id: i64) -> Result<Option<FileRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, parent_dir, content, mode, uid, gid,
                   create_time, update_time
            FROM files
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&**self)
        .await?;

        Ok(row.map(|r| row_to_file_record(&r)))
    }

    /// Fetch the record named `name` directly under `parent_dir`
    pub async fn find_child(
        &self,
        parent_dir: i64,
        name: &str,
    ) -> Result<Option<FileRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, parent_dir, content, mode, uid, gid,
                   create_time, update_time
            FROM files
            WHERE parent_dir = ?1 AND name = ?2
            "#,
        )
        .bind(parent_dir)
        .bind(name)
        .fetch_optional(&**self)
        .await?;

        Ok(row.map(|r| row_to_file_record(&r)))
    }

    /// List every record directly under `parent_dir`
    pub async fn list_children(&self, parent_dir: i64) -> Result<Vec<FileRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, kind, parent_dir, content, mode, uid, gid,
                   create_time, update_time
            FROM files
            WHERE parent_dir = ?1
            ORDER BY name ASC
            "#,
        )
        .bind(parent_dir)
        .fetch_all(&**self)
        .await?;

        Ok(rows.iter().map(row_to_file_record).collect())
    }

    /// Insert a new record and return it with its assigned id
    pub async fn insert_file(&self, new: NewFileRecord) -> Result<FileRecord, sqlx::Error> {
        let now = OffsetDateTime::now_utc();

        let result = sqlx::query(
            r#"
            INSERT INTO files (
                name, kind, parent_dir, content, mode, uid, gid,
                create_time, update_time
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&new.name)
        .bind(new.kind.as_str())
        .bind(new.parent_dir)
        .bind(new.content)
        .bind(new.mode as i64)
        .bind(new.uid as i64)
        .bind(new.gid as i64)
        .bind(now)
        .bind(now)
        .execute(&**self)
        .await?;

        let id = result.last_insert_rowid();
        self.find_file(id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Persist every mutable column of `record`, including `update_time`
    /// as the caller set it (see [`FileRecord::touch`])
    pub async fn update_file(&self, record: &FileRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE files
            SET name = ?1,
                parent_dir = ?2,
                content = ?3,
                mode = ?4,
                uid = ?5,
                gid = ?6,
                update_time = ?7
            WHERE id = ?8
            "#,
        )
        .bind(&record.name)
        .bind(record.parent_dir)
        .bind(record.content.as_deref())
        .bind(record.mode as i64)
        .bind(record.uid as i64)
        .bind(record.gid as i64)
        .bind(record.update_time)
        .bind(record.id)
        .execute(&**self)
        .await?;

        Ok(())
    }

    /// Delete a record by primary key
    pub async fn delete_file(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?1")
            .bind(id)
            .execute(&**self)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_file_record(row: &sqlx::sqlite::SqliteRow) -> FileRecord {
    FileRecord {
        id: row.get("id"),
        name: row.get("name"),
        kind: row.get::<String, _>("kind").parse().unwrap(),
        parent_dir: row.get("parent_dir"),
        content: row.get("content"),
        mode: row.get::<i64, _>("mode") as u32,
        uid: row.get::<i64, _>("uid") as u32,
        gid: row.get::<i64, _>("gid") as u32,
        create_time: row.get("create_time"),
        update_time: row.get("update_time"),
    }
}
