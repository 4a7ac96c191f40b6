//! Channel repository.
//!
//! Status and pid are always written by the same statement so an external
//! reader can never observe a running channel without a pid.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::errors::{SupervisorError, SupervisorResult};
use crate::models::{Channel, ChannelStatus, EncoderParams, Output};

/// Request for channel creation.
#[derive(Debug, Clone)]
pub struct ChannelCreateRequest {
    pub name: String,
    pub input_url: String,
    pub encoder_params: EncoderParams,
    pub outputs: Vec<Output>,
    pub auto_restart: bool,
}

/// Partial update of a channel's configuration.
#[derive(Debug, Clone, Default)]
pub struct ChannelUpdateRequest {
    pub name: Option<String>,
    pub input_url: Option<String>,
    pub encoder_params: Option<EncoderParams>,
    pub outputs: Option<Vec<Output>>,
    pub auto_restart: Option<bool>,
}

impl ChannelUpdateRequest {
    /// Fields beyond name/auto_restart change what the encoder runs with and
    /// are rejected while the channel is running.
    pub fn touches_critical_fields(&self) -> bool {
        self.input_url.is_some() || self.encoder_params.is_some() || self.outputs.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.input_url.is_none()
            && self.encoder_params.is_none()
            && self.outputs.is_none()
            && self.auto_restart.is_none()
    }
}

#[derive(Clone)]
pub struct ChannelRepository {
    pool: Pool<Sqlite>,
}

impl ChannelRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: ChannelCreateRequest) -> SupervisorResult<Channel> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO channels (
                id, name, input_url, status, ffmpeg_params, outputs,
                auto_restart, pid, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&request.name)
        .bind(&request.input_url)
        .bind(ChannelStatus::Stopped.to_string())
        .bind(serde_json::to_string(&request.encoder_params)?)
        .bind(serde_json::to_string(&request.outputs)?)
        .bind(request.auto_restart)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Channel {
            id,
            name: request.name,
            input_url: request.input_url,
            status: ChannelStatus::Stopped,
            encoder_params: request.encoder_params,
            outputs: request.outputs,
            auto_restart: request.auto_restart,
            pid: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, id: Uuid) -> SupervisorResult<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(map_row).transpose()
    }

    pub async fn list(&self) -> SupervisorResult<Vec<Channel>> {
        let rows = sqlx::query("SELECT * FROM channels ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(map_row).collect()
    }

    pub async fn list_by_status(&self, status: ChannelStatus) -> SupervisorResult<Vec<Channel>> {
        let rows = sqlx::query("SELECT * FROM channels WHERE status = ? ORDER BY created_at, id")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(map_row).collect()
    }

    /// Persist a status transition together with the matching pid.
    pub async fn set_status_and_pid(
        &self,
        id: Uuid,
        status: ChannelStatus,
        pid: Option<u32>,
    ) -> SupervisorResult<()> {
        sqlx::query("UPDATE channels SET status = ?, pid = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(pid.map(|p| p as i64))
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: ChannelUpdateRequest,
    ) -> SupervisorResult<Option<Channel>> {
        let Some(mut channel) = self.get(id).await? else {
            return Ok(None);
        };

        if let Some(name) = request.name {
            channel.name = name;
        }
        if let Some(input_url) = request.input_url {
            channel.input_url = input_url;
        }
        if let Some(params) = request.encoder_params {
            channel.encoder_params = params;
        }
        if let Some(outputs) = request.outputs {
            channel.outputs = outputs;
        }
        if let Some(auto_restart) = request.auto_restart {
            channel.auto_restart = auto_restart;
        }
        channel.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE channels
            SET name = ?, input_url = ?, ffmpeg_params = ?, outputs = ?,
                auto_restart = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&channel.name)
        .bind(&channel.input_url)
        .bind(serde_json::to_string(&channel.encoder_params)?)
        .bind(serde_json::to_string(&channel.outputs)?)
        .bind(channel.auto_restart)
        .bind(channel.updated_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(Some(channel))
    }

    pub async fn delete(&self, id: Uuid) -> SupervisorResult<bool> {
        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn map_row(row: SqliteRow) -> SupervisorResult<Channel> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let params: String = row.try_get("ffmpeg_params")?;
    let outputs: String = row.try_get("outputs")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Channel {
        id: Uuid::parse_str(&id)
            .map_err(|e| SupervisorError::internal(format!("bad channel id {id}: {e}")))?,
        name: row.try_get("name")?,
        input_url: row.try_get("input_url")?,
        status: status
            .parse()
            .map_err(|e: String| SupervisorError::internal(e))?,
        encoder_params: serde_json::from_str(&params)?,
        outputs: serde_json::from_str(&outputs)?,
        auto_restart: row.try_get("auto_restart")?,
        pid: row.try_get::<Option<i64>, _>("pid")?.map(|p| p as u32),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(value: &str) -> SupervisorResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SupervisorError::internal(format!("bad timestamp {value}: {e}")))
}
