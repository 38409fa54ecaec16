/// Identity-scoped resolution cache
///
/// A single facade over one of four interchangeable backends:
/// - `memory`: bounded in-process LRU map with native TTL
/// - `file`: one JSON document rewritten atomically on every write
/// - `sqlite`: one table keyed by identity, stale rows removed lazily
/// - `redis`: one key per identity with server-side expiry

pub mod file;
pub mod memory;
pub mod models;
pub mod remote;
pub mod sqlite;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use models::ResolutionRecord;
pub use remote::RedisBackend;
pub use sqlite::SqliteBackend;

use crate::error::{ResolverError, ResolverResult};
use async_trait::async_trait;
use chrono::Duration;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

/// Longest accepted freshness window (ten years)
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Check a TTL and convert it to the window used for freshness checks
pub(crate) fn freshness_window(ttl_secs: u64) -> ResolverResult<Duration> {
    if ttl_secs == 0 {
        return Err(ResolverError::Configuration(
            "Cache TTL must be greater than zero".to_string(),
        ));
    }
    if ttl_secs > MAX_TTL_SECS {
        return Err(ResolverError::Configuration(format!(
            "Cache TTL of {}s exceeds the maximum of {}s",
            ttl_secs, MAX_TTL_SECS
        )));
    }

    i64::try_from(ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| {
            ResolverError::Configuration(format!("Cache TTL of {}s is out of range", ttl_secs))
        })
}

/// Cache backend trait
///
/// Implementations persist one record per identity. Backends without native
/// expiry must still never hand back a record older than their TTL.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch the record for an identity, if any
    async fn get(&self, identity: &str) -> ResolverResult<Option<ResolutionRecord>>;

    /// Store a record, replacing any prior record for the same identity
    async fn put(&self, record: &ResolutionRecord) -> ResolverResult<()>;

    /// Remove one identity, or everything when `identity` is `None`
    async fn clear(&self, identity: Option<&str>) -> ResolverResult<()>;
}

/// Recognized backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    File,
    Sqlite,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Redis => "redis",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "sqlite" => Ok(BackendKind::Sqlite),
            "redis" => Ok(BackendKind::Redis),
            other => Err(ResolverError::Configuration(format!(
                "Unsupported cache backend: {:?} (expected memory, file, sqlite or redis)",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-specific parameters
///
/// Only the fields relevant to the selected backend are read.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Maximum entries held by the memory backend (default: 100)
    pub max_entries: u64,

    /// JSON document used by the file backend
    pub file_path: PathBuf,

    /// Database file used by the sqlite backend
    pub db_path: PathBuf,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub redis_url: String,

    /// Key prefix for Redis entries (default: "stun:")
    pub key_prefix: String,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            max_entries: 100,
            file_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".stun_resolver_cache.json"),
            db_path: PathBuf::from("stun_cache.sqlite"),
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "stun:".to_string(),
        }
    }
}

/// Cache layer configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Active backend (default: file)
    pub backend: BackendKind,

    /// Freshness window in seconds (default: 300 = 5 minutes)
    pub ttl_secs: u64,

    pub options: BackendOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            ttl_secs: 300,
            options: BackendOptions::default(),
        }
    }
}

impl CacheConfig {
    /// Load from environment variables
    pub fn from_env() -> ResolverResult<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> ResolverResult<Self> {
        let defaults = BackendOptions::default();

        let backend = var("STUN_CACHE_BACKEND")
            .unwrap_or_else(|| "file".to_string())
            .parse()?;
        let ttl_secs = var("STUN_CACHE_TTL")
            .unwrap_or_else(|| "300".to_string())
            .parse()
            .map_err(|_| ResolverError::Configuration("Invalid STUN_CACHE_TTL".to_string()))?;
        let max_entries = var("STUN_CACHE_MAX_ENTRIES")
            .unwrap_or_else(|| "100".to_string())
            .parse()
            .map_err(|_| {
                ResolverError::Configuration("Invalid STUN_CACHE_MAX_ENTRIES".to_string())
            })?;

        Ok(Self {
            backend,
            ttl_secs,
            options: BackendOptions {
                max_entries,
                file_path: var("STUN_CACHE_FILE")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.file_path),
                db_path: var("STUN_CACHE_DB")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.db_path),
                redis_url: var("REDIS_URL").unwrap_or(defaults.redis_url),
                key_prefix: var("STUN_CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            },
        })
    }
}

/// Resolution cache facade over exactly one backend
pub struct ResolutionCache {
    backend: Box<dyn CacheBackend>,
    kind: BackendKind,
    ttl: Duration,
}

impl ResolutionCache {
    /// Create a cache from a backend name ("memory", "file", "sqlite", "redis")
    pub async fn open(kind: &str, ttl_secs: u64, options: BackendOptions) -> ResolverResult<Self> {
        Self::new(kind.parse()?, ttl_secs, options).await
    }

    /// Create a cache for the given backend kind
    pub async fn new(
        kind: BackendKind,
        ttl_secs: u64,
        options: BackendOptions,
    ) -> ResolverResult<Self> {
        let ttl = freshness_window(ttl_secs)?;
        let std_ttl = std::time::Duration::from_secs(ttl_secs);

        let backend: Box<dyn CacheBackend> = match kind {
            BackendKind::Memory => Box::new(MemoryBackend::new(options.max_entries, std_ttl)?),
            BackendKind::File => Box::new(FileBackend::new(options.file_path, std_ttl)?),
            BackendKind::Sqlite => Box::new(SqliteBackend::connect(&options.db_path, std_ttl).await?),
            BackendKind::Redis => Box::new(
                RedisBackend::connect(&options.redis_url, options.key_prefix, std_ttl).await?,
            ),
        };

        info!("Resolution cache ready (backend: {}, ttl: {}s)", kind, ttl_secs);

        Ok(Self {
            backend,
            kind,
            ttl,
        })
    }

    /// Create a cache from a loaded configuration
    pub async fn from_config(config: &CacheConfig) -> ResolverResult<Self> {
        Self::new(config.backend, config.ttl_secs, config.options.clone()).await
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get the cached record for an identity
    ///
    /// A miss is a normal outcome and yields `Ok(None)`.
    pub async fn get_cached_info(&self, identity: &str) -> ResolverResult<Option<ResolutionRecord>> {
        match self.backend.get(identity).await? {
            Some(record) if record.is_fresh(self.ttl) => Ok(Some(record)),
            Some(_) => {
                debug!("Stale record ignored for {}", identity);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Store a record, overwriting any prior record for the same identity
    pub async fn cache_info(&self, record: &ResolutionRecord) -> ResolverResult<()> {
        self.backend.put(record).await
    }

    /// Clear one identity, or the whole cache when `identity` is `None`
    pub async fn clear(&self, identity: Option<&str>) -> ResolverResult<()> {
        self.backend.clear(identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn options_in(dir: &std::path::Path) -> BackendOptions {
        BackendOptions {
            file_path: dir.join("cache.json"),
            db_path: dir.join("cache.sqlite"),
            ..BackendOptions::default()
        }
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("File".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("redis".parse::<BackendKind>().unwrap(), BackendKind::Redis);
        assert!(matches!(
            "postgres".parse::<BackendKind>(),
            Err(ResolverError::Configuration(_))
        ));
    }

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.ttl_secs, 300);
        assert_eq!(config.options.max_entries, 100);
        assert_eq!(config.options.key_prefix, "stun:");
    }

    #[tokio::test]
    async fn test_unknown_backend_is_configuration_error() {
        let dir = tempdir().unwrap();
        let result = ResolutionCache::open("mongo", 60, options_in(dir.path())).await;
        assert!(matches!(result, Err(ResolverError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_configuration_error() {
        let dir = tempdir().unwrap();
        let result = ResolutionCache::open("memory", 0, options_in(dir.path())).await;
        assert!(matches!(result, Err(ResolverError::Configuration(_))));
    }

    #[test]
    fn test_cache_config_from_vars() {
        let vars = HashMap::from([
            ("STUN_CACHE_BACKEND", "memory"),
            ("STUN_CACHE_TTL", "60"),
            ("STUN_CACHE_MAX_ENTRIES", "5"),
        ]);
        let config =
            CacheConfig::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.ttl_secs, 60);
        assert_eq!(config.options.max_entries, 5);
    }

    #[test]
    fn test_invalid_numbers_are_configuration_errors() {
        for (name, value) in [
            ("STUN_CACHE_TTL", "five minutes"),
            ("STUN_CACHE_MAX_ENTRIES", "lots"),
            ("STUN_CACHE_MAX_ENTRIES", "-1"),
        ] {
            let result = CacheConfig::from_vars(|var| (var == name).then(|| value.to_string()));
            assert!(
                matches!(result, Err(ResolverError::Configuration(_))),
                "{}={} was accepted",
                name,
                value
            );
        }
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_configuration_error() {
        let dir = tempdir().unwrap();

        for kind in ["memory", "file", "sqlite"] {
            for ttl_secs in [MAX_TTL_SECS + 1, 100_000_000_000, u64::MAX] {
                let result = ResolutionCache::open(kind, ttl_secs, options_in(dir.path())).await;
                assert!(
                    matches!(result, Err(ResolverError::Configuration(_))),
                    "{} accepted ttl {}",
                    kind,
                    ttl_secs
                );
            }
        }
    }

    #[tokio::test]
    async fn test_maximum_ttl_keeps_records_fresh() {
        let dir = tempdir().unwrap();

        for kind in ["memory", "file", "sqlite"] {
            let cache = ResolutionCache::open(kind, MAX_TTL_SECS, options_in(dir.path()))
                .await
                .unwrap();
            assert_eq!(cache.ttl(), Duration::seconds(MAX_TTL_SECS as i64));

            let record = ResolutionRecord::new("user123", "192.168.1.1", 5000, "Full Cone").unwrap();
            cache.cache_info(&record).await.unwrap();
            assert!(
                cache.get_cached_info("user123").await.unwrap().is_some(),
                "{} lost a fresh record",
                kind
            );
            cache.clear(None).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_facade_hides_stale_records() {
        let dir = tempdir().unwrap();

        for kind in ["memory", "file", "sqlite"] {
            let cache = ResolutionCache::open(kind, 60, options_in(dir.path()))
                .await
                .unwrap();

            // Written long ago, so stale regardless of what the backend enforces
            let old = ResolutionRecord::recorded(
                "user123",
                "192.168.1.1",
                5000,
                "Full Cone",
                Utc::now() - Duration::seconds(3600),
            )
            .unwrap();
            cache.cache_info(&old).await.unwrap();

            assert!(
                cache.get_cached_info("user123").await.unwrap().is_none(),
                "{} returned a stale record",
                kind
            );
        }
    }

    #[tokio::test]
    async fn test_clear_all_on_local_backends() {
        let dir = tempdir().unwrap();

        for kind in ["memory", "file", "sqlite"] {
            let cache = ResolutionCache::open(kind, 60, options_in(dir.path()))
                .await
                .unwrap();

            for identity in ["alice", "bob"] {
                let record =
                    ResolutionRecord::new(identity, "198.51.100.2", 55555, "Symmetric").unwrap();
                cache.cache_info(&record).await.unwrap();
            }

            cache.clear(None).await.unwrap();

            assert!(cache.get_cached_info("alice").await.unwrap().is_none());
            assert!(cache.get_cached_info("bob").await.unwrap().is_none());
        }
    }
}
