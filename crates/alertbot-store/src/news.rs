//! Processed-news bookkeeping for the TCC news digest.

use async_trait::async_trait;
use sqlx::SqlitePool;

use alertbot_core::news::ProcessedNewsStore;

use crate::{error::Result, Database};

pub async fn is_processed(pool: &SqlitePool, message_text: &str) -> Result<bool> {
    let row = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT 1
        FROM processed_news
        WHERE message_text = ?
        "#,
    )
    .bind(message_text)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// Record a forwarded post. Returns `false` if the text was already there.
pub async fn mark_processed(pool: &SqlitePool, channel_id: &str, message_text: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO processed_news (channel_id, message_text)
        VALUES (?, ?)
        "#,
    )
    .bind(channel_id)
    .bind(message_text)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone)]
pub struct SqliteProcessedNewsStore {
    db: Database,
}

impl SqliteProcessedNewsStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProcessedNewsStore for SqliteProcessedNewsStore {
    async fn is_processed(&self, text: &str) -> alertbot_core::Result<bool> {
        Ok(is_processed(self.db.pool(), text).await?)
    }

    async fn mark_processed(&self, channel: &str, text: &str) -> alertbot_core::Result<bool> {
        Ok(mark_processed(self.db.pool(), channel, text).await?)
    }
}
