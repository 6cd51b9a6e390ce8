/// Conversation and message persistence
///
/// Conversations are created implicitly by their first message and never
/// deleted. Messages are immutable once written.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sdk::{ConversationSummary, HistoryMessage, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{from_millis, now_millis};

/// Characters of the first message kept in a conversation title
const TITLE_CHARS: usize = 50;

/// Conversation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Value,
}

impl Conversation {
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Message record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

impl Message {
    pub fn to_history(&self) -> HistoryMessage {
        HistoryMessage {
            role: self.role,
            content: self.content.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Title for a conversation opened by `first_message`: its first 50
/// characters followed by `...`, whatever its length.
pub fn conversation_title(first_message: &str) -> String {
    let head: String = first_message.chars().take(TITLE_CHARS).collect();
    format!("{}...", head)
}

/// Repository for conversations and their messages
#[derive(Debug, Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message, creating the conversation on first use.
    ///
    /// The conversation upsert, the message insert and the conversation's
    /// `updated_at` bump share one transaction.
    pub async fn record_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        metadata: Option<&Value>,
    ) -> Result<Message> {
        let now = now_millis();
        let id = Uuid::new_v4().to_string();
        let metadata = metadata
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let metadata_json =
            serde_json::to_string(&metadata).context("Failed to serialize message metadata")?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO conversations (id, title, created_at, updated_at, metadata)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(conversation_id)
        .bind(conversation_title(content))
        .bind(now)
        .bind(now)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await
        .context("Failed to create conversation")?;

        let seq = sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, timestamp, metadata)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await
        .context("Failed to insert message")?
        .last_insert_rowid();

        sqlx::query("UPDATE conversations SET updated_at = ?, last_message_seq = ? WHERE id = ?")
            .bind(now)
            .bind(seq)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update conversation timestamp")?;

        tx.commit().await.context("Failed to commit message")?;

        debug!(
            "Recorded {} message {} in conversation {}",
            role, id, conversation_id
        );

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: from_millis(now),
            metadata,
        })
    }

    /// The most recent `limit` messages of a conversation, oldest first.
    ///
    /// An unknown conversation yields an empty history.
    pub async fn get_history(&self, conversation_id: &str, limit: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, timestamp, metadata
             FROM messages
             WHERE conversation_id = ?
             ORDER BY timestamp DESC, seq DESC
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch conversation history")?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Conversations ordered by most recent activity
    pub async fn list_conversations(&self, limit: i64) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT id, title, created_at, updated_at, metadata
             FROM conversations
             ORDER BY updated_at DESC, last_message_seq DESC
             LIMIT ?",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list conversations")?;

        Ok(rows.iter().map(conversation_from_row).collect())
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, title, created_at, updated_at, metadata
             FROM conversations
             WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch conversation")?;

        Ok(row.as_ref().map(conversation_from_row))
    }
}

fn parse_metadata(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}

fn conversation_from_row(r: &SqliteRow) -> Conversation {
    Conversation {
        id: r.get("id"),
        title: r.get("title"),
        created_at: from_millis(r.get("created_at")),
        updated_at: from_millis(r.get("updated_at")),
        metadata: parse_metadata(r.get("metadata")),
    }
}

fn message_from_row(r: &SqliteRow) -> Result<Message> {
    let role: String = r.get("role");
    Ok(Message {
        id: r.get("id"),
        conversation_id: r.get("conversation_id"),
        role: role.parse().map_err(|e: String| anyhow!(e))?,
        content: r.get("content"),
        timestamp: from_millis(r.get("timestamp")),
        metadata: parse_metadata(r.get("metadata")),
    })
}
