//! Relational log sink backed by SQLite.
//!
//! # Responsibilities
//! - Persist entries as rows of a single table (default `request_logs`)
//! - Serve the admin read path: paged queries, counts, lookups, purges, stats
//!
//! # Design Decisions
//! - `created_at` is stored as UTC epoch milliseconds; every read and bound
//!   uses UTC, so no timezone conversion happens anywhere
//! - Every statement runs under `statement_timeout` so a wedged database
//!   cannot hang the drain task or shutdown
//! - Filters only contribute predicates for the fields that are present

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::config::StoreConfig;
use crate::sink::{Destination, LogEntry, Sink, SinkCore, SinkError, SinkMode, SinkStatsSnapshot};

const COLUMNS: &str = "id, method, path, client_ip, user_agent, status_code, duration_ms, timestamp, custom_fields, created_at";

/// A persisted log row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredLog {
    pub id: i64,
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub user_agent: String,
    pub status_code: u16,
    pub duration_ms: f64,
    pub timestamp: String,
    pub custom_fields: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl StoredLog {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let custom_fields: Option<String> = row.try_get("custom_fields")?;
        let user_agent: Option<String> = row.try_get("user_agent")?;
        let status_code: i64 = row.try_get("status_code")?;
        let created_at: i64 = row.try_get("created_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            method: row.try_get("method")?,
            path: row.try_get("path")?,
            client_ip: row.try_get("client_ip")?,
            user_agent: user_agent.unwrap_or_default(),
            status_code: u16::try_from(status_code).unwrap_or_default(),
            duration_ms: row.try_get("duration_ms")?,
            timestamp: row.try_get("timestamp")?,
            custom_fields: custom_fields.and_then(|raw| serde_json::from_str(&raw).ok()),
            created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
        })
    }
}

/// Conjunction of optional row predicates. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub method: Option<String>,
    /// Case-sensitive substring of the request path.
    pub path: Option<String>,
    pub status_code: Option<u16>,
    /// Inclusive lower bound on `created_at`.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub end_time: Option<DateTime<Utc>>,
}

impl LogFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        let mut sep = " WHERE ";

        if let Some(method) = self.method.as_deref().filter(|m| !m.is_empty()) {
            qb.push(sep).push("method = ").push_bind(method.to_string());
            sep = " AND ";
        }
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            qb.push(sep).push("instr(path, ").push_bind(path.to_string()).push(") > 0");
            sep = " AND ";
        }
        if let Some(status) = self.status_code {
            qb.push(sep).push("status_code = ").push_bind(i64::from(status));
            sep = " AND ";
        }
        if let Some(start) = self.start_time {
            qb.push(sep).push("created_at >= ").push_bind(start.timestamp_millis());
            sep = " AND ";
        }
        if let Some(end) = self.end_time {
            qb.push(sep).push("created_at <= ").push_bind(end.timestamp_millis());
        }
    }
}

/// Aggregate figures for the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LogStats {
    #[serde(rename = "today_logs")]
    pub today_count: i64,
    #[serde(rename = "total_logs")]
    pub total_count: i64,
    #[serde(rename = "avg_duration")]
    pub avg_duration_ms: f64,
    /// Percentage of rows with status >= 400; 0 for an empty table.
    pub error_rate: f64,
}

/// Connection pool plus the statements bound to one table.
pub struct StoreDestination {
    pool: SqlitePool,
    table: String,
    timeout: Duration,
    insert_sql: String,
}

impl StoreDestination {
    async fn connect(config: &StoreConfig) -> Result<Self, SinkError> {
        if !is_valid_identifier(&config.table) {
            return Err(SinkError::InvalidTable(config.table.clone()));
        }

        let pool = connect_pool(config).await?;

        let insert_sql = format!(
            "INSERT INTO {} (method, path, client_ip, user_agent, status_code, duration_ms, timestamp, custom_fields, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            config.table
        );

        Ok(Self {
            pool,
            table: config.table.clone(),
            timeout: Duration::from_secs(config.statement_timeout_secs.max(1)),
            insert_sql,
        })
    }

    async fn insert(&self, entry: &LogEntry, created_at: DateTime<Utc>) -> Result<(), SinkError> {
        let custom_fields = if entry.custom_fields.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&entry.custom_fields)?)
        };

        let query = sqlx::query(&self.insert_sql)
            .bind(&entry.method)
            .bind(&entry.path)
            .bind(&entry.client_ip)
            .bind(&entry.user_agent)
            .bind(i64::from(entry.status_code))
            .bind(entry.duration_ms)
            .bind(&entry.timestamp)
            .bind(custom_fields)
            .bind(created_at.timestamp_millis());

        bounded(self.timeout, query.execute(&self.pool)).await?;
        Ok(())
    }
}

#[async_trait]
impl Destination for StoreDestination {
    async fn persist(&self, entry: &LogEntry) -> Result<(), SinkError> {
        self.insert(entry, Utc::now()).await
    }

    async fn release(&self) -> Result<(), SinkError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Sink that writes entries as rows and exposes the admin read path.
pub struct StoreSink {
    core: SinkCore<StoreDestination>,
}

impl StoreSink {
    /// Connect to the store. Failure to connect is fatal; no sink is returned.
    /// Call [`StoreSink::ensure_schema`] once before the first write.
    pub async fn connect(config: &StoreConfig, mode: SinkMode) -> Result<Self, SinkError> {
        let dest = StoreDestination::connect(config).await?;
        tracing::info!(url = %config.url, table = %config.table, mode = ?mode, "store log sink connected");
        Ok(Self {
            core: SinkCore::new("store", dest, mode),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.core.destination().pool
    }

    pub fn table(&self) -> &str {
        &self.core.destination().table
    }

    /// Create the log table and its indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        let dest = self.core.destination();
        let table = &dest.table;
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    method TEXT NOT NULL,
                    path TEXT NOT NULL,
                    client_ip TEXT NOT NULL,
                    user_agent TEXT,
                    status_code INTEGER NOT NULL,
                    duration_ms REAL NOT NULL,
                    timestamp TEXT NOT NULL,
                    custom_fields TEXT,
                    created_at INTEGER NOT NULL
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_method ON {table}(method)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_path ON {table}(path)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_status_code ON {table}(status_code)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table}(created_at)"),
        ];

        for sql in &statements {
            bounded(dest.timeout, sqlx::query(sql).execute(&dest.pool)).await?;
        }
        Ok(())
    }

    /// Rows matching `filter`, newest first.
    pub async fn query(
        &self,
        offset: i64,
        limit: i64,
        filter: &LogFilter,
    ) -> Result<Vec<StoredLog>, SinkError> {
        let dest = self.core.destination();
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM {}", dest.table));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit.max(0))
            .push(" OFFSET ")
            .push_bind(offset.max(0));

        let rows = bounded(dest.timeout, qb.build().fetch_all(&dest.pool)).await?;
        rows.iter()
            .map(|row| StoredLog::from_row(row).map_err(SinkError::from))
            .collect()
    }

    /// Number of rows matching `filter`.
    pub async fn count(&self, filter: &LogFilter) -> Result<i64, SinkError> {
        let dest = self.core.destination();
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {}", dest.table));
        filter.push_where(&mut qb);
        bounded(dest.timeout, qb.build_query_scalar::<i64>().fetch_one(&dest.pool)).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<StoredLog>, SinkError> {
        let dest = self.core.destination();
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = ?", dest.table);
        let row = bounded(dest.timeout, sqlx::query(&sql).bind(id).fetch_optional(&dest.pool)).await?;
        row.as_ref()
            .map(StoredLog::from_row)
            .transpose()
            .map_err(SinkError::from)
    }

    /// Delete rows created more than `days` days ago. A row exactly at the
    /// cutoff is kept. Returns the number of rows removed.
    ///
    /// A retention window reaching past the earliest representable time
    /// deletes nothing.
    pub async fn delete_older_than(&self, days: u32) -> Result<u64, SinkError> {
        let dest = self.core.destination();
        let cutoff = TimeDelta::try_days(i64::from(days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let sql = format!("DELETE FROM {} WHERE created_at < ?", dest.table);
        let result = bounded(
            dest.timeout,
            sqlx::query(&sql).bind(cutoff.timestamp_millis()).execute(&dest.pool),
        )
        .await?;

        tracing::info!(days, deleted = result.rows_affected(), "purged old request logs");
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<LogStats, SinkError> {
        let dest = self.core.destination();
        let today_start = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        let sql = format!(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN created_at >= ? THEN 1 ELSE 0 END), 0) AS today,
                    COALESCE(AVG(duration_ms), 0.0) AS avg_duration,
                    COALESCE(SUM(CASE WHEN status_code >= 400 THEN 1 ELSE 0 END), 0) AS errors
             FROM {}",
            dest.table
        );

        let row = bounded(
            dest.timeout,
            sqlx::query(&sql)
                .bind(today_start.timestamp_millis())
                .fetch_one(&dest.pool),
        )
        .await?;

        let total: i64 = row.try_get("total")?;
        let errors: i64 = row.try_get("errors")?;
        let error_rate = if total == 0 {
            0.0
        } else {
            errors as f64 * 100.0 / total as f64
        };

        Ok(LogStats {
            today_count: row.try_get("today")?,
            total_count: total,
            avg_duration_ms: row.try_get("avg_duration")?,
            error_rate,
        })
    }
}

#[async_trait]
impl Sink for StoreSink {
    async fn write(&self, entry: LogEntry) -> Result<(), SinkError> {
        self.core.write(entry).await
    }

    async fn flush(&self) {
        self.core.flush().await
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.core.close().await
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_buffered(&self) -> bool {
        self.core.is_buffered()
    }

    fn stats(&self) -> SinkStatsSnapshot {
        self.core.stats()
    }
}

/// Open a SQLite pool for `config.url`, creating the database file if needed.
pub async fn connect_pool(config: &StoreConfig) -> Result<SqlitePool, SinkError> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(SinkError::Connect)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_with(options)
        .await
        .map_err(SinkError::Connect)
}

/// Run a store operation under the configured statement timeout.
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, SinkError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(SinkError::from),
        Err(_) => Err(SinkError::Timeout(limit)),
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
