/// STUN Resolver - Orchestrates public address discovery with caching
use crate::{
    cache::{ResolutionCache, ResolutionRecord},
    config::ResolverConfig,
    discovery::{BindAddress, Discover, Discovery, StunServer},
    error::{ResolverError, ResolverResult},
    identity::{CallerContext, IdentityResolver},
    metrics,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Main STUN resolver - combines the resolution cache with external discovery
///
/// Concurrent misses for the same identity are not coalesced: each performs
/// its own discovery and the last write wins.
pub struct StunResolver {
    cache: ResolutionCache,
    identities: IdentityResolver,
    discoverer: Arc<dyn Discover>,
    server: StunServer,
    bind: BindAddress,
    discovery_timeout: Option<Duration>,
}

impl StunResolver {
    /// Create a resolver using a random default STUN server
    pub fn new(
        cache: ResolutionCache,
        identities: IdentityResolver,
        discoverer: impl Discover,
    ) -> Self {
        Self {
            cache,
            identities,
            discoverer: Arc::new(discoverer),
            server: StunServer::random_default(),
            bind: BindAddress::default(),
            discovery_timeout: None,
        }
    }

    /// Build a resolver (cache, machine identity) from configuration
    pub async fn from_config(
        config: &ResolverConfig,
        discoverer: impl Discover,
    ) -> ResolverResult<Self> {
        config.validate()?;

        let cache = ResolutionCache::from_config(&config.cache).await?;
        let identities = IdentityResolver::new(&config.identity.machine_id_file).await?;

        let mut resolver = Self::new(cache, identities, discoverer)
            .with_server(config.stun.server.clone())
            .with_bind_address(config.stun.bind.clone());
        if let Some(secs) = config.stun.discovery_timeout_secs {
            resolver = resolver.with_discovery_timeout(Duration::from_secs(secs));
        }

        info!(
            "Using STUN server {} with {} cache",
            resolver.server,
            resolver.cache.kind()
        );
        Ok(resolver)
    }

    pub fn with_server(mut self, server: StunServer) -> Self {
        self.server = server;
        self
    }

    pub fn with_bind_address(mut self, bind: BindAddress) -> Self {
        self.bind = bind;
        self
    }

    /// Bound each discovery call
    ///
    /// The blocking call itself cannot be interrupted; on timeout its result
    /// is discarded.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn identities(&self) -> &IdentityResolver {
        &self.identities
    }

    pub fn server(&self) -> &StunServer {
        &self.server
    }

    /// Resolve the caller's public address with caching
    ///
    /// Resolution order:
    /// 1. Derive the caller identity
    /// 2. Check cache (fast path, no network)
    /// 3. Query the STUN server on a blocking worker
    /// 4. Cache the successful result
    pub async fn resolve(&self, caller: &CallerContext) -> ResolverResult<ResolutionRecord> {
        let identity = self.identities.resolve_identity(caller);
        self.resolve_identity(&identity).await
    }

    /// Resolve for an already-derived identity
    pub async fn resolve_identity(&self, identity: &str) -> ResolverResult<ResolutionRecord> {
        if identity.is_empty() {
            return Err(ResolverError::Validation(
                "Identity cannot be empty".to_string(),
            ));
        }
        let backend = self.cache.kind().as_str();

        // Check cache first
        match self.cache.get_cached_info(identity).await {
            Ok(Some(record)) => {
                debug!("Found STUN info in cache for {}", identity);
                metrics::record_cache_access(backend, true);
                return Ok(record);
            }
            Ok(None) => metrics::record_cache_access(backend, false),
            Err(e) => {
                warn!("Cache lookup failed for {}, treating as miss: {}", identity, e);
                metrics::record_cache_access(backend, false);
            }
        }

        // Cache miss - query the STUN server
        info!("Fetching new STUN data from {} for {}", self.server, identity);
        let discovery = self.query_server().await?;

        let record =
            ResolutionRecord::new(identity, discovery.ip, discovery.port, discovery.nat_type)?;

        // Cache the successful resolution
        self.cache.cache_info(&record).await.map_err(|e| {
            ResolverError::Resolution(format!("Failed to cache STUN info: {}", e))
        })?;

        Ok(record)
    }

    /// Run the blocking discovery call off the async executor
    async fn query_server(&self) -> ResolverResult<Discovery> {
        let discoverer = Arc::clone(&self.discoverer);
        let server = self.server.clone();
        let bind = self.bind.clone();
        let server_label = self.server.to_string();
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || {
            discoverer.discover(&bind.address, bind.port, &server.host, server.port)
        });

        let joined = match self.discovery_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    metrics::record_discovery(&server_label, false, started.elapsed().as_secs_f64());
                    return Err(ResolverError::Resolution(format!(
                        "STUN discovery via {} timed out after {:?}",
                        server_label, limit
                    )));
                }
            },
            None => task.await,
        };

        let result = joined
            .map_err(|e| ResolverError::Resolution(format!("Discovery task failed: {}", e)))
            .and_then(|outcome| {
                outcome.map_err(|e| ResolverError::Resolution(format!("{:#}", e)))
            });

        metrics::record_discovery(&server_label, result.is_ok(), started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            warn!("STUN discovery via {} failed: {}", server_label, e);
        }

        result
    }

    /// Public IP assigned by the STUN server
    pub async fn public_ip(&self, caller: &CallerContext) -> ResolverResult<String> {
        Ok(self.resolve(caller).await?.ip)
    }

    /// Public port assigned by the STUN server
    pub async fn public_port(&self, caller: &CallerContext) -> ResolverResult<u16> {
        Ok(self.resolve(caller).await?.port)
    }

    /// NAT classification reported by the STUN server
    pub async fn nat_type(&self, caller: &CallerContext) -> ResolverResult<String> {
        Ok(self.resolve(caller).await?.nat_type)
    }

    /// Identity the caller's resolution is cached under
    pub async fn identity(&self, caller: &CallerContext) -> ResolverResult<String> {
        Ok(self.resolve(caller).await?.identity)
    }
}
