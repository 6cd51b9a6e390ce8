/// Uploaded file metadata
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sdk::FileEntry;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use super::{from_millis, now_millis};

/// File record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub filepath: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub conversation_id: Option<String>,
}

impl FileRecord {
    pub fn entry(&self) -> FileEntry {
        FileEntry {
            filename: self.filename.clone(),
            size: self.size,
            created_at: self.created_at,
        }
    }
}

/// File repository for database operations
#[derive(Debug, Clone)]
pub struct FileRepository {
    pool: SqlitePool,
}

impl FileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record_file(
        &self,
        filename: &str,
        filepath: &Path,
        size: u64,
        conversation_id: Option<&str>,
    ) -> Result<FileRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_millis();
        let filepath = filepath.display().to_string();

        sqlx::query(
            "INSERT INTO files (id, filename, filepath, size, created_at, conversation_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(filename)
        .bind(&filepath)
        .bind(i64::try_from(size).context("File size out of range")?)
        .bind(now)
        .bind(conversation_id)
        .execute(&self.pool)
        .await
        .context("Failed to record file")?;

        debug!("Recorded file {} ({} bytes)", filename, size);

        Ok(FileRecord {
            id,
            filename: filename.to_string(),
            filepath,
            size,
            created_at: from_millis(now),
            conversation_id: conversation_id.map(str::to_string),
        })
    }

    /// Every recorded file, newest first
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT id, filename, filepath, size, created_at, conversation_id
             FROM files
             ORDER BY created_at DESC, seq DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list files")?;

        Ok(rows
            .iter()
            .map(|r| FileRecord {
                id: r.get("id"),
                filename: r.get("filename"),
                filepath: r.get("filepath"),
                size: r.get::<i64, _>("size").max(0) as u64,
                created_at: from_millis(r.get("created_at")),
                conversation_id: r.get("conversation_id"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_and_list_files() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("cove.db")).await.unwrap();
        let repo = db.files();

        let first = repo
            .record_file("notes.txt", &PathBuf::from("/tmp/w/notes.txt"), 12, None)
            .await
            .unwrap();
        repo.record_file("data.csv", &PathBuf::from("/tmp/w/data.csv"), 300, Some("c1"))
            .await
            .unwrap();

        assert_eq!(first.filepath, "/tmp/w/notes.txt");

        let files = repo.list_files().await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["data.csv", "notes.txt"]);
        assert_eq!(files[0].conversation_id.as_deref(), Some("c1"));
        assert_eq!(files[0].entry().size, 300);
        assert_eq!(files[1].conversation_id, None);
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("cove.db")).await.unwrap();
        assert!(db.files().list_files().await.unwrap().is_empty());
    }
}
