/// In-process cache backend
use crate::{
    cache::{freshness_window, CacheBackend, ResolutionRecord},
    error::{ResolverError, ResolverResult},
};
use async_trait::async_trait;
use moka::ops::compute::{CompResult, Op};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::time::Duration;
use tracing::debug;

/// Bounded in-memory backend
///
/// Least-recently-used entries are evicted once `max_entries` is exceeded and
/// every entry expires `ttl` after insertion. The underlying map is safe for
/// concurrent get/put from any number of tasks. A write never replaces a record
/// with a newer `recorded_at`.
#[derive(Clone)]
pub struct MemoryBackend {
    entries: Cache<String, ResolutionRecord>,
}

impl MemoryBackend {
    pub fn new(max_entries: u64, ttl: Duration) -> ResolverResult<Self> {
        if max_entries == 0 {
            return Err(ResolverError::Configuration(
                "Memory cache needs room for at least one entry".to_string(),
            ));
        }
        freshness_window(ttl.as_secs())?;

        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Ok(Self { entries })
    }

    /// Number of live entries (after pending evictions are applied)
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, identity: &str) -> ResolverResult<Option<ResolutionRecord>> {
        let record = self.entries.get(identity);
        debug!(
            "Memory cache {}: {}",
            if record.is_some() { "HIT" } else { "MISS" },
            identity
        );
        Ok(record)
    }

    async fn put(&self, record: &ResolutionRecord) -> ResolverResult<()> {
        let outcome = self
            .entries
            .entry(record.identity.clone())
            .and_compute_with(|existing| match existing {
                Some(entry) if entry.value().recorded_at > record.recorded_at => Op::Nop,
                _ => Op::Put(record.clone()),
            });
        if let CompResult::Unchanged(_) = outcome {
            debug!("Skipping older record for {}", record.identity);
        }
        // Apply capacity eviction now rather than on the next maintenance cycle
        self.entries.run_pending_tasks();
        Ok(())
    }

    async fn clear(&self, identity: Option<&str>) -> ResolverResult<()> {
        match identity {
            Some(identity) => self.entries.invalidate(identity),
            None => {
                self.entries.invalidate_all();
                self.entries.run_pending_tasks();
            }
        }
        Ok(())
    }
}
