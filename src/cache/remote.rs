/// Redis cache backend
///
/// Each identity is one hash holding the JSON record and its `recorded_at` in
/// epoch microseconds, written with a server-side expiry equal to the cache
/// TTL. Once a key expires Redis reports it absent, so no freshness check is
/// needed here.
use crate::{
    cache::{freshness_window, CacheBackend, ResolutionRecord},
    error::{ResolverError, ResolverResult},
};
use async_trait::async_trait;
use lazy_static::lazy_static;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RECORD_FIELD: &str = "record";

lazy_static! {
    /// Store the record unless the key already holds a newer one.
    /// KEYS[1] = key, ARGV = record JSON, recorded_at micros, ttl secs.
    /// Returns 1 when written, 0 when skipped.
    static ref SET_IF_NEWER: Script = Script::new(
        r#"
        if redis.call('TYPE', KEYS[1]).ok ~= 'hash' then
            redis.call('DEL', KEYS[1])
        end
        local current = redis.call('HGET', KEYS[1], 'recorded_at')
        if current and tonumber(current) > tonumber(ARGV[2]) then
            return 0
        end
        redis.call('HSET', KEYS[1], 'record', ARGV[1], 'recorded_at', ARGV[2])
        redis.call('EXPIRE', KEYS[1], ARGV[3])
        return 1
        "#
    );
}

/// Redis backend
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    key_prefix: String,
    ttl: Duration,
}

impl RedisBackend {
    /// Connect to Redis
    pub async fn connect(
        redis_url: &str,
        key_prefix: impl Into<String>,
        ttl: Duration,
    ) -> ResolverResult<Self> {
        freshness_window(ttl.as_secs())?;
        info!("Connecting to Redis at {}", redis_url);

        let client = Client::open(redis_url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            ResolverError::Configuration(format!("Redis client creation failed: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            ResolverError::Configuration(format!("Redis connection failed: {}", e))
        })?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
            ttl,
        })
    }

    /// Build a cache key with prefix
    fn build_key(&self, identity: &str) -> String {
        format!("{}{}", self.key_prefix, identity)
    }

    async fn delete_key(&self, cache_key: &str) -> ResolverResult<()> {
        let mut conn = self.connection.clone();
        let _: u64 = conn.del(cache_key).await.map_err(|e| {
            warn!("Redis DELETE failed for {}: {}", cache_key, e);
            ResolverError::Storage(format!("Cache delete failed: {}", e))
        })?;

        Ok(())
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, identity: &str) -> ResolverResult<Option<ResolutionRecord>> {
        let cache_key = self.build_key(identity);

        let mut conn = self.connection.clone();
        let result = match conn
            .hget::<_, _, Option<String>>(&cache_key, RECORD_FIELD)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                // Unreachable store on read is a miss, not a failure
                warn!("Redis GET failed for {}: {}", cache_key, e);
                return Ok(None);
            }
        };

        match result {
            Some(json) => match serde_json::from_str(&json) {
                Ok(record) => {
                    debug!("Cache HIT: {}", cache_key);
                    Ok(Some(record))
                }
                Err(e) => {
                    warn!("Failed to deserialize cached record: {}", e);
                    // Delete corrupted cache entry
                    let _ = self.delete_key(&cache_key).await;
                    Ok(None)
                }
            },
            None => {
                debug!("Cache MISS: {}", cache_key);
                Ok(None)
            }
        }
    }

    async fn put(&self, record: &ResolutionRecord) -> ResolverResult<()> {
        let cache_key = self.build_key(&record.identity);
        let ttl = self.ttl.as_secs();

        let json = serde_json::to_string(record).map_err(|e| {
            error!("Failed to serialize record for cache: {}", e);
            ResolverError::Storage(format!("Cache serialization failed: {}", e))
        })?;

        debug!("Cache SET: {} (TTL: {}s)", cache_key, ttl);

        let mut conn = self.connection.clone();
        let written: i64 = SET_IF_NEWER
            .key(&cache_key)
            .arg(json)
            .arg(record.recorded_at.timestamp_micros())
            .arg(ttl)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!("Redis SET failed for {}: {}", cache_key, e);
                ResolverError::Storage(format!("Cache set failed: {}", e))
            })?;

        if written == 0 {
            debug!("Skipping older record for {}", record.identity);
        }
        Ok(())
    }

    async fn clear(&self, identity: Option<&str>) -> ResolverResult<()> {
        if let Some(identity) = identity {
            return self.delete_key(&self.build_key(identity)).await;
        }

        let pattern = format!("{}*", self.key_prefix);
        info!("Cache FLUSH pattern: {}", pattern);

        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn.keys(&pattern).await.map_err(|e| {
            error!("Redis KEYS failed: {}", e);
            ResolverError::Storage(format!("Cache keys lookup failed: {}", e))
        })?;

        if keys.is_empty() {
            return Ok(());
        }

        let deleted: u64 = conn.del(&keys).await.map_err(|e| {
            error!("Redis DELETE multiple keys failed: {}", e);
            ResolverError::Storage(format!("Cache flush failed: {}", e))
        })?;

        info!("Cache flushed {} keys matching {}", deleted, pattern);
        Ok(())
    }
}
