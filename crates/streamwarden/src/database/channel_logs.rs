//! Channel log repository with bounded per-channel retention.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::{ChannelLog, LogLevel};

#[derive(Clone)]
pub struct ChannelLogRepository {
    pool: Pool<Sqlite>,
}

impl ChannelLogRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Append a log line and prune the channel's history past `max_entries`.
    pub async fn append(
        &self,
        channel_id: Uuid,
        level: LogLevel,
        message: &str,
        created_at: DateTime<Utc>,
        max_entries: u32,
    ) -> SupervisorResult<()> {
        sqlx::query(
            "INSERT INTO channel_logs (channel_id, level, message, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(channel_id.to_string())
        .bind(level.to_string())
        .bind(message)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM channel_logs
            WHERE channel_id = ?
              AND id NOT IN (
                SELECT id FROM channel_logs
                WHERE channel_id = ?
                ORDER BY id DESC
                LIMIT ?
              )
            "#,
        )
        .bind(channel_id.to_string())
        .bind(channel_id.to_string())
        .bind(max_entries as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Newest-first page of a channel's logs, optionally filtered by level.
    pub async fn list(
        &self,
        channel_id: Uuid,
        level: Option<LogLevel>,
        limit: u32,
        offset: u32,
    ) -> SupervisorResult<Vec<ChannelLog>> {
        let rows = match level {
            Some(level) => {
                sqlx::query(
                    r#"
                    SELECT * FROM channel_logs
                    WHERE channel_id = ? AND level = ?
                    ORDER BY id DESC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(channel_id.to_string())
                .bind(level.to_string())
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM channel_logs
                    WHERE channel_id = ?
                    ORDER BY id DESC
                    LIMIT ? OFFSET ?
                    "#,
                )
                .bind(channel_id.to_string())
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(map_row).collect()
    }

    pub async fn count(&self, channel_id: Uuid) -> SupervisorResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM channel_logs WHERE channel_id = ?")
                .bind(channel_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn delete_for_channel(&self, channel_id: Uuid) -> SupervisorResult<u64> {
        let result = sqlx::query("DELETE FROM channel_logs WHERE channel_id = ?")
            .bind(channel_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn map_row(row: SqliteRow) -> SupervisorResult<ChannelLog> {
    let channel_id: String = row.try_get("channel_id")?;
    let level: String = row.try_get("level")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ChannelLog {
        id: row.try_get("id")?,
        channel_id: Uuid::parse_str(&channel_id)
            .map_err(|e| SupervisorError::internal(format!("bad channel id {channel_id}: {e}")))?,
        level: level
            .parse()
            .map_err(|e: String| SupervisorError::internal(e))?,
        message: row.try_get("message")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SupervisorError::internal(format!("bad timestamp {created_at}: {e}")))?,
    })
}
