//! SQLite archive of observed messages, used as chat history.

use std::time::{SystemTime, UNIX_EPOCH};

use {
    courier_forward::types::{ChatId, ChatMessage, MediaKind, MessageId},
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{Error, Result};

pub struct MessageArchive {
    pool: SqlitePool,
}

impl MessageArchive {
    /// Open a pool and run the archive migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::external("failed to connect to SQLite", e))?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Use an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a message. Edits overwrite the stored copy.
    pub async fn record(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO telegram_messages
                (chat_id, message_id, group_id, text, media, edited, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(chat_id, message_id) DO UPDATE SET
                group_id = excluded.group_id,
                text = excluded.text,
                media = excluded.media,
                edited = excluded.edited",
        )
        .bind(message.chat_id)
        .bind(message.message_id)
        .bind(&message.group_id)
        .bind(&message.text)
        .bind(message.media.as_str())
        .bind(message.edited)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Up to `limit` messages of `chat_id` after `after`, ascending.
    pub async fn page(
        &self,
        chat_id: ChatId,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT chat_id, message_id, group_id, text, media, edited
             FROM telegram_messages
             WHERE chat_id = ? AND message_id > ?
             ORDER BY message_id ASC
             LIMIT ?",
        )
        .bind(chat_id)
        .bind(after.unwrap_or(MessageId::MIN))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ChatMessage> {
                let media: String = row.try_get("media")?;
                Ok(ChatMessage {
                    chat_id: row.try_get("chat_id")?,
                    message_id: row.try_get("message_id")?,
                    group_id: row.try_get("group_id")?,
                    text: row.try_get("text")?,
                    media: media.parse().unwrap_or(MediaKind::Other),
                    edited: row.try_get("edited")?,
                })
            })
            .collect()
    }

    pub async fn count(&self, chat_id: ChatId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM telegram_messages WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(u64::try_from(n).unwrap_or_default())
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
