//! SQLite-backed persistent store.
//!
//! Holds the connection pool and applies the embedded schema migrations at
//! startup. Entity access goes through the repository types in this module's
//! submodules.

use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use crate::config::DatabaseConfig;

pub mod channel_logs;
pub mod channels;

pub use channel_logs::ChannelLogRepository;
pub use channels::{ChannelCreateRequest, ChannelRepository, ChannelUpdateRequest};

/// Embedded migrations, applied in order and tracked by version.
/// Each entry is (version, name, statements).
const MIGRATIONS: &[(i64, &str, &[&str])] = &[(
    1,
    "initial_schema",
    &[
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            input_url TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'stopped',
            ffmpeg_params TEXT NOT NULL DEFAULT '{}',
            outputs TEXT NOT NULL DEFAULT '[]',
            auto_restart INTEGER NOT NULL DEFAULT 0,
            pid INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_channels_status ON channels(status)",
        "CREATE INDEX IF NOT EXISTS idx_channels_pid ON channels(pid)",
        "CREATE INDEX IF NOT EXISTS idx_channels_created_at ON channels(created_at)",
        r#"
        CREATE TABLE IF NOT EXISTS channel_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_channel_logs_channel_id ON channel_logs(channel_id)",
        "CREATE INDEX IF NOT EXISTS idx_channel_logs_created_at ON channel_logs(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_channel_logs_level ON channel_logs(level)",
    ],
)];

#[derive(Clone, Debug)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Run all embedded migrations that have not been applied yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (version, name, statements) in MIGRATIONS {
            let applied: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            )
            .bind(*version)
            .fetch_one(&self.pool)
            .await?;

            if applied > 0 {
                debug!("Migration {version} ({name}) already applied");
                continue;
            }

            let mut tx = self.pool.begin().await?;
            for statement in statements.iter() {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
                .bind(*version)
                .bind(*name)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            info!("Applied migration {version}: {name}");
        }

        Ok(())
    }
}
