//! Conversation/Message Store
//!
//! Pure data access over the shared SQLite database; no delivery policy.
//! Conversation pairs are deliberately not unique: both the explicit create
//! endpoint and an implicit "new" send may insert rows for the same pair,
//! and `find_conversation` resolves to the oldest match.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use crate::models::{Conversation, Message};

pub struct MessageStore {
    db_path: PathBuf,
}

impl MessageStore {
    /// Create new store backed by the database at `db_path`
    pub async fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            db_path: db_path.into(),
        };

        store.init_db().await?;

        info!("[Store] Initialized at {:?}", store.db_path);

        Ok(store)
    }

    /// Initialize SQLite tables
    async fn init_db(&self) -> Result<()> {
        let pool = self.get_pool().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                member_a TEXT NOT NULL,
                member_b TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        // No foreign key to conversations: messages are accepted for any
        // conversation id the caller names
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        pool.close().await;
        Ok(())
    }

    /// Get database connection
    async fn get_pool(&self) -> Result<sqlx::SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(&self.db_path)
            .create_if_missing(true);
        Ok(SqlitePoolOptions::new().connect_with(options).await?)
    }

    /// Create a conversation between two members
    pub async fn create_conversation(
        &self,
        member_a: &str,
        member_b: &str,
    ) -> Result<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            members: [member_a.to_string(), member_b.to_string()],
            created_at: Utc::now(),
        };

        let pool = self.get_pool().await?;

        sqlx::query(
            "INSERT INTO conversations (id, member_a, member_b, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.members[0])
        .bind(&conversation.members[1])
        .bind(conversation.created_at.to_rfc3339())
        .execute(&pool)
        .await?;

        pool.close().await;

        info!("[Store] Conversation created: {}", conversation.id);

        Ok(conversation)
    }

    /// List every conversation `user_id` is a member of
    pub async fn conversations_by_member(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let pool = self.get_pool().await?;

        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, member_a, member_b, created_at FROM conversations
            WHERE member_a = ? OR member_b = ?
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&pool)
        .await?;

        pool.close().await;

        Ok(rows.into_iter().map(conversation_from_row).collect())
    }

    /// Find the oldest conversation between two members, either orientation
    pub async fn find_conversation(
        &self,
        member_a: &str,
        member_b: &str,
    ) -> Result<Option<Conversation>> {
        let pool = self.get_pool().await?;

        let row: Option<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, member_a, member_b, created_at FROM conversations
            WHERE (member_a = ? AND member_b = ?) OR (member_a = ? AND member_b = ?)
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(member_a)
        .bind(member_b)
        .bind(member_b)
        .bind(member_a)
        .fetch_optional(&pool)
        .await?;

        pool.close().await;

        Ok(row.map(conversation_from_row))
    }

    /// Append a message to a conversation
    pub async fn create_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };

        let pool = self.get_pool().await?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, text, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(message.created_at.to_rfc3339())
        .execute(&pool)
        .await?;

        pool.close().await;

        Ok(message)
    }

    /// All messages of a conversation, oldest first
    pub async fn messages_by_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let pool = self.get_pool().await?;

        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, sender_id, text, created_at FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&pool)
        .await?;

        pool.close().await;

        Ok(rows
            .into_iter()
            .map(|(id, conversation_id, sender_id, text, created_at)| Message {
                id,
                conversation_id,
                sender_id,
                text,
                created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }
}

fn conversation_from_row(
    (id, member_a, member_b, created_at): (String, String, String, String),
) -> Conversation {
    Conversation {
        id,
        members: [member_a, member_b],
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    }
}
