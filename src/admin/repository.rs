//! Persistent request-logging settings.
//!
//! A single row (`id = 1`) in the `log_config` table holds the settings an
//! operator set through the admin API, so they survive restarts. The time
//! format is not persisted; it always comes from the config file.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::LogSettings;
use crate::sink::CustomFields;

const TABLE: &str = "log_config";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode custom fields: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("settings operation timed out after {0:?}")]
    Timeout(Duration),
}

/// The persisted subset of [`LogSettings`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedSettings {
    pub enabled: bool,
    pub async_mode: bool,
    pub buffer_size: usize,
    pub skip_paths: Vec<String>,
    pub custom_fields: CustomFields,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PersistedSettings {
    pub fn from_settings(settings: &LogSettings) -> Self {
        Self {
            enabled: settings.enabled,
            async_mode: settings.async_mode,
            buffer_size: settings.buffer_size,
            skip_paths: settings.skip_paths.clone(),
            custom_fields: settings.custom_fields.clone(),
            updated_at: None,
        }
    }

    /// Overlay the persisted values on `base`, keeping its time format.
    pub fn merge_into(&self, base: &LogSettings) -> LogSettings {
        LogSettings {
            enabled: self.enabled,
            skip_paths: self.skip_paths.clone(),
            custom_fields: self.custom_fields.clone(),
            time_format: base.time_format.clone(),
            async_mode: self.async_mode,
            buffer_size: self.buffer_size,
        }
    }
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self::from_settings(&LogSettings::default())
    }
}

pub struct SettingsRepository {
    pool: SqlitePool,
    timeout: Duration,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Create the table if needed and make sure the settings row exists.
    pub async fn init_table(&self) -> Result<PersistedSettings, RepositoryError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                id INTEGER PRIMARY KEY DEFAULT 1,
                enabled INTEGER NOT NULL DEFAULT 1,
                async_mode INTEGER NOT NULL DEFAULT 1,
                buffer_size INTEGER NOT NULL DEFAULT 1000,
                skip_paths TEXT,
                custom_fields TEXT,
                updated_at INTEGER
            )"
        );
        self.bounded(async {
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(RepositoryError::from)
        })
        .await?;
        self.load().await
    }

    /// Load the stored settings, seeding defaults when the row is missing.
    pub async fn load(&self) -> Result<PersistedSettings, RepositoryError> {
        let sql = format!(
            "SELECT enabled, async_mode, buffer_size,
                    COALESCE(skip_paths, '') AS skip_paths,
                    COALESCE(custom_fields, '{{}}') AS custom_fields,
                    updated_at
             FROM {TABLE} WHERE id = 1"
        );
        let row = self
            .bounded(async {
                sqlx::query(&sql)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(RepositoryError::from)
            })
            .await?;

        let Some(row) = row else {
            let defaults = PersistedSettings::default();
            self.save(&defaults).await?;
            tracing::info!("seeded default logging settings");
            return Ok(defaults);
        };

        let buffer_size: i64 = row.try_get("buffer_size")?;
        let skip_paths: String = row.try_get("skip_paths")?;
        let custom_fields: String = row.try_get("custom_fields")?;
        let updated_at: Option<i64> = row.try_get("updated_at")?;

        Ok(PersistedSettings {
            enabled: row.try_get("enabled")?,
            async_mode: row.try_get("async_mode")?,
            buffer_size: usize::try_from(buffer_size).unwrap_or_default(),
            skip_paths: parse_skip_paths(&skip_paths),
            custom_fields: parse_custom_fields(&custom_fields),
            updated_at: updated_at.and_then(DateTime::from_timestamp_millis),
        })
    }

    /// Replace the settings row in one transaction.
    pub async fn save(&self, settings: &PersistedSettings) -> Result<(), RepositoryError> {
        let delete = format!("DELETE FROM {TABLE} WHERE id = 1");
        let insert = format!(
            "INSERT INTO {TABLE} (id, enabled, async_mode, buffer_size, skip_paths, custom_fields, updated_at)
             VALUES (1, ?, ?, ?, ?, ?, ?)"
        );
        let custom_fields = marshal_custom_fields(&settings.custom_fields)?;
        let buffer_size = i64::try_from(settings.buffer_size).unwrap_or(i64::MAX);

        self.bounded(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&delete).execute(&mut *tx).await?;
            sqlx::query(&insert)
                .bind(settings.enabled)
                .bind(settings.async_mode)
                .bind(buffer_size)
                .bind(join_skip_paths(&settings.skip_paths))
                .bind(custom_fields)
                .bind(Utc::now().timestamp_millis())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<(), RepositoryError>(())
        })
        .await
    }

    pub async fn reset(&self) -> Result<PersistedSettings, RepositoryError> {
        let defaults = PersistedSettings::default();
        self.save(&defaults).await?;
        Ok(defaults)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, RepositoryError>
    where
        F: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RepositoryError::Timeout(self.timeout))?
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_skip_paths(paths: &str) -> Vec<String> {
    paths
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_skip_paths(paths: &[String]) -> String {
    paths.join(",")
}

/// Malformed JSON yields no fields.
pub fn parse_custom_fields(raw: &str) -> CustomFields {
    serde_json::from_str(raw).unwrap_or_default()
}

pub fn marshal_custom_fields(fields: &CustomFields) -> Result<String, serde_json::Error> {
    serde_json::to_string(fields)
}
