/// SQLite cache backend - one row per identity
use crate::{
    cache::{freshness_window, CacheBackend, ResolutionRecord},
    error::{ResolverError, ResolverResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

/// SQLite backend
///
/// No native expiry: reads check freshness and delete stale rows on the way out.
#[derive(Clone)]
pub struct SqliteBackend {
    db: SqlitePool,
    ttl: Duration,
}

impl SqliteBackend {
    /// Open (or create) the database at `path` and ensure the table exists
    pub async fn connect(path: &Path, ttl: std::time::Duration) -> ResolverResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ResolverError::Configuration(format!(
                        "Failed to create database directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let db = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await
        .map_err(|e| {
            ResolverError::Configuration(format!(
                "Failed to open cache database {}: {}",
                path.display(),
                e
            ))
        })?;

        let backend = Self::with_pool(db, ttl).await?;
        info!("SQLite cache opened at {}", path.display());
        Ok(backend)
    }

    /// Use an existing pool, creating the cache table if needed
    pub async fn with_pool(db: SqlitePool, ttl: std::time::Duration) -> ResolverResult<Self> {
        let ttl = freshness_window(ttl.as_secs())?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stun_cache (
                identity TEXT PRIMARY KEY NOT NULL,
                ip TEXT NOT NULL,
                port INTEGER NOT NULL,
                nat_type TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        Ok(Self { db, ttl })
    }

    async fn delete(&self, identity: &str) -> ResolverResult<()> {
        sqlx::query("DELETE FROM stun_cache WHERE identity = ?1")
            .bind(identity)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn get(&self, identity: &str) -> ResolverResult<Option<ResolutionRecord>> {
        let result = sqlx::query(
            r#"
            SELECT identity, ip, port, nat_type, recorded_at
            FROM stun_cache
            WHERE identity = ?1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = result else {
            debug!("SQLite cache MISS: {}", identity);
            return Ok(None);
        };

        let port: i64 = row.try_get("port")?;
        let record = ResolutionRecord {
            identity: row.try_get("identity")?,
            ip: row.try_get("ip")?,
            port: u16::try_from(port)
                .map_err(|_| ResolverError::Storage(format!("Invalid cached port: {}", port)))?,
            nat_type: row.try_get("nat_type")?,
            recorded_at: parse_timestamp(&row.try_get::<String, _>("recorded_at")?)?,
        };

        if record.is_fresh(self.ttl) {
            debug!("SQLite cache HIT: {}", identity);
            Ok(Some(record))
        } else {
            // Expired, clean it up
            debug!("SQLite cache STALE, deleting: {}", identity);
            self.delete(identity).await?;
            Ok(None)
        }
    }

    async fn put(&self, record: &ResolutionRecord) -> ResolverResult<()> {
        // Never let an older record replace a newer one
        sqlx::query(
            r#"
            INSERT INTO stun_cache (identity, ip, port, nat_type, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(identity) DO UPDATE SET
                ip = excluded.ip,
                port = excluded.port,
                nat_type = excluded.nat_type,
                recorded_at = excluded.recorded_at
            WHERE excluded.recorded_at >= stun_cache.recorded_at
            "#,
        )
        .bind(&record.identity)
        .bind(&record.ip)
        .bind(record.port as i64)
        .bind(&record.nat_type)
        .bind(format_timestamp(&record.recorded_at))
        .execute(&self.db)
        .await?;

        debug!("SQLite cache SET: {}", record.identity);
        Ok(())
    }

    async fn clear(&self, identity: Option<&str>) -> ResolverResult<()> {
        match identity {
            Some(identity) => self.delete(identity).await,
            None => {
                sqlx::query("DELETE FROM stun_cache").execute(&self.db).await?;
                Ok(())
            }
        }
    }
}

/// Fixed-width RFC3339 so stored timestamps compare lexicographically
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse RFC3339 timestamp
fn parse_timestamp(s: &str) -> ResolverResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ResolverError::Storage(format!("Invalid timestamp: {}", e)))
}
