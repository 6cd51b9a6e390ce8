/// Conversation Store
///
/// Durable, append-only log of messages grouped by conversation, plus the
/// metadata of uploaded files. Backed by SQLite through one long-lived sqlx
/// pool shared by every repository, with WAL journaling and foreign keys on.
///
/// Timestamps are stored as unix milliseconds. Rows also carry an insertion
/// sequence so ordering stays total when two writes land in the same
/// millisecond.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod conversations;
pub mod files;

// Re-export commonly used types
pub use conversations::{Conversation, ConversationRepository, Message};
pub use files::{FileRecord, FileRepository};

/// Database connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at `db_path` and apply the schema.
    ///
    /// WAL recovery after an unclean shutdown happens inside SQLite when the
    /// file is reopened; call [`Database::close`] on graceful shutdown to
    /// checkpoint the WAL into the main file.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Apply the schema. Every statement is idempotent.
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::Executor::execute(&self.pool, include_str!("../../migrations/001_initial.sql"))
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trip a trivial query, used by the health probe.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    /// Flush the WAL to disk
    pub async fn flush_wal(&self) -> Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Flush the WAL and close every pooled connection.
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");

        self.flush_wal().await?;
        self.pool.close().await;

        info!("Database connection closed");
        Ok(())
    }

    pub fn conversations(&self) -> ConversationRepository {
        ConversationRepository::new(self.pool.clone())
    }

    pub fn files(&self) -> FileRepository {
        FileRepository::new(self.pool.clone())
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("cove.db");

        let db = Database::new(&db_path).await.unwrap();

        assert!(db_path.exists());
        db.ping().await.unwrap();
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cove.db");

        let db = Database::new(&db_path).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();

        assert_eq!(tables, vec!["conversations", "files", "messages"]);
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cove.db");

        let db = Database::new(&db_path).await.unwrap();
        db.conversations()
            .record_message("c1", sdk::Role::User, "hello", None)
            .await
            .unwrap();
        db.close().await.unwrap();

        let db = Database::new(&db_path).await.unwrap();
        let history = db.conversations().get_history("c1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_wal_mode_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("cove.db")).await.unwrap();

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_millis_round_trip() {
        let now = now_millis();
        assert_eq!(from_millis(now).timestamp_millis(), now);
    }
}
