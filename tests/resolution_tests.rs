/// End-to-end resolution tests across the local cache backends
///
/// Redis is exercised by the ignored tests in `cache::remote`.
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use stun_resolver::{
    BackendOptions, CallerContext, Discover, Discovery, IdentityResolver, ResolutionCache,
    ResolutionRecord, ResolverError, StunResolver, StunServer,
};
use tempfile::tempdir;

const LOCAL_BACKENDS: [&str; 3] = ["memory", "file", "sqlite"];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("stun_resolver=debug")
        .with_test_writer()
        .try_init();
}

/// Scripted discoverer: counts calls and fails while `failure` is set
#[derive(Clone, Default)]
struct ScriptedDiscoverer {
    calls: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<String>>>,
}

impl ScriptedDiscoverer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

impl Discover for ScriptedDiscoverer {
    fn discover(
        &self,
        bind_address: &str,
        bind_port: u16,
        server_host: &str,
        server_port: u16,
    ) -> anyhow::Result<Discovery> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(bind_address, "0.0.0.0");
        assert_eq!(bind_port, 54320);
        assert_eq!(server_host, "stun.example.org");
        assert_eq!(server_port, 3478);

        if let Some(message) = self.failure.lock().unwrap().clone() {
            anyhow::bail!(message);
        }

        // Simulate network latency
        std::thread::sleep(Duration::from_millis(20));
        Ok(Discovery {
            nat_type: "Full Cone".to_string(),
            ip: "203.0.113.1".to_string(),
            port: 45678,
        })
    }
}

fn options_in(dir: &Path, max_entries: u64) -> BackendOptions {
    BackendOptions {
        max_entries,
        file_path: dir.join("stun_cache.json"),
        db_path: dir.join("stun_cache.sqlite"),
        ..BackendOptions::default()
    }
}

async fn create_resolver(
    dir: &Path,
    backend: &str,
    ttl_secs: u64,
) -> (StunResolver, ScriptedDiscoverer) {
    init_tracing();
    let cache = ResolutionCache::open(backend, ttl_secs, options_in(dir, 100))
        .await
        .unwrap();
    let identities = IdentityResolver::new(&dir.join("machine_id"))
        .await
        .unwrap();
    let discoverer = ScriptedDiscoverer::default();
    let resolver = StunResolver::new(cache, identities, discoverer.clone())
        .with_server(StunServer::new("stun.example.org", 3478));
    (resolver, discoverer)
}

#[tokio::test]
async fn test_first_resolution_calls_discovery_once() {
    for backend in LOCAL_BACKENDS {
        let dir = tempdir().unwrap();
        let (resolver, discoverer) = create_resolver(dir.path(), backend, 300).await;
        let caller = CallerContext::authenticated("user123");

        let before = Utc::now();
        let record = resolver.resolve(&caller).await.unwrap();
        let after = Utc::now();

        assert_eq!(discoverer.calls(), 1, "{}", backend);
        assert!(record.recorded_at >= before && record.recorded_at <= after);

        let cached = resolver
            .cache()
            .get_cached_info("user123")
            .await
            .unwrap()
            .expect("record cached");
        assert_eq!(cached.ip, "203.0.113.1");
        assert_eq!(cached.port, 45678);
        assert_eq!(cached.nat_type, "Full Cone");
    }
}

#[tokio::test]
async fn test_fresh_record_skips_discovery() {
    for backend in LOCAL_BACKENDS {
        let dir = tempdir().unwrap();
        let (resolver, discoverer) = create_resolver(dir.path(), backend, 300).await;

        let seeded =
            ResolutionRecord::new("test_user", "198.51.100.2", 55555, "Symmetric").unwrap();
        resolver.cache().cache_info(&seeded).await.unwrap();

        let record = resolver
            .resolve(&CallerContext::authenticated("test_user"))
            .await
            .unwrap();

        assert_eq!(discoverer.calls(), 0, "{}", backend);
        assert_eq!(record.ip, "198.51.100.2");
        assert_eq!(record.port, 55555);
        assert_eq!(record.nat_type, "Symmetric");
    }
}

#[tokio::test]
async fn test_expired_record_triggers_new_discovery() {
    for backend in LOCAL_BACKENDS {
        let dir = tempdir().unwrap();
        let (resolver, discoverer) = create_resolver(dir.path(), backend, 60).await;

        let expired = ResolutionRecord::recorded(
            "user123",
            "198.51.100.2",
            55555,
            "Symmetric",
            Utc::now() - chrono::Duration::seconds(120),
        )
        .unwrap();
        resolver.cache().cache_info(&expired).await.unwrap();

        let record = resolver
            .resolve(&CallerContext::authenticated("user123"))
            .await
            .unwrap();

        assert_eq!(discoverer.calls(), 1, "{}", backend);
        assert_eq!(record.ip, "203.0.113.1");
    }
}

#[tokio::test]
async fn test_ttl_scenario() {
    for backend in LOCAL_BACKENDS {
        let dir = tempdir().unwrap();
        let cache = ResolutionCache::open(backend, 2, options_in(dir.path(), 10))
            .await
            .unwrap();

        let record = ResolutionRecord::new("user123", "192.168.1.1", 5000, "Full Cone").unwrap();
        cache.cache_info(&record).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let cached = cache.get_cached_info("user123").await.unwrap();
        assert_eq!(
            cached.map(|r| (r.ip, r.port, r.nat_type)),
            Some(("192.168.1.1".to_string(), 5000, "Full Cone".to_string())),
            "{}",
            backend
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(
            cache.get_cached_info("user123").await.unwrap().is_none(),
            "{} kept an expired record",
            backend
        );
    }
}

#[tokio::test]
async fn test_memory_capacity_eviction() {
    let dir = tempdir().unwrap();
    let cache = ResolutionCache::open("memory", 300, options_in(dir.path(), 1))
        .await
        .unwrap();

    for identity in ["a", "b"] {
        let record = ResolutionRecord::new(identity, "192.168.1.1", 5000, "Full Cone").unwrap();
        cache.cache_info(&record).await.unwrap();
    }

    assert!(cache.get_cached_info("a").await.unwrap().is_none());
    assert!(cache.get_cached_info("b").await.unwrap().is_some());
}

#[tokio::test]
async fn test_recorded_at_never_goes_backwards() {
    for backend in LOCAL_BACKENDS {
        let dir = tempdir().unwrap();
        let cache = ResolutionCache::open(backend, 300, options_in(dir.path(), 10))
            .await
            .unwrap();
        let now = Utc::now();

        let newer = ResolutionRecord::recorded("user123", "10.0.0.2", 2000, "Open", now).unwrap();
        let older = ResolutionRecord::recorded(
            "user123",
            "10.0.0.1",
            1000,
            "Open",
            now - chrono::Duration::seconds(5),
        )
        .unwrap();

        cache.cache_info(&newer).await.unwrap();
        cache.cache_info(&older).await.unwrap();

        let cached = cache.get_cached_info("user123").await.unwrap().unwrap();
        assert_eq!(cached.ip, "10.0.0.2", "{}", backend);
        assert!(cached.recorded_at >= newer.recorded_at, "{}", backend);

        // A later record still replaces the current one
        let latest = ResolutionRecord::recorded(
            "user123",
            "10.0.0.3",
            3000,
            "Open",
            now + chrono::Duration::seconds(1),
        )
        .unwrap();
        cache.cache_info(&latest).await.unwrap();
        let cached = cache.get_cached_info("user123").await.unwrap().unwrap();
        assert_eq!(cached.ip, "10.0.0.3", "{}", backend);
    }
}

#[tokio::test]
async fn test_clear_identity_and_all() {
    for backend in LOCAL_BACKENDS {
        let dir = tempdir().unwrap();
        let cache = ResolutionCache::open(backend, 300, options_in(dir.path(), 10))
            .await
            .unwrap();

        for identity in ["user123", "user456", "user789"] {
            let record = ResolutionRecord::new(identity, "192.168.1.1", 5000, "Full Cone").unwrap();
            cache.cache_info(&record).await.unwrap();
        }

        cache.clear(Some("user123")).await.unwrap();
        assert!(cache.get_cached_info("user123").await.unwrap().is_none(), "{}", backend);
        assert!(cache.get_cached_info("user456").await.unwrap().is_some(), "{}", backend);

        cache.clear(None).await.unwrap();
        assert!(cache.get_cached_info("user456").await.unwrap().is_none(), "{}", backend);
        assert!(cache.get_cached_info("user789").await.unwrap().is_none(), "{}", backend);
    }
}

#[tokio::test]
async fn test_discovery_failure_is_resolution_error_and_not_cached() {
    for backend in LOCAL_BACKENDS {
        let dir = tempdir().unwrap();
        let (resolver, discoverer) = create_resolver(dir.path(), backend, 300).await;
        discoverer.fail_with("STUN server unreachable");

        let result = resolver
            .resolve(&CallerContext::authenticated("user123"))
            .await;

        match result {
            Err(ResolverError::Resolution(message)) => {
                assert!(message.contains("STUN server unreachable"))
            }
            other => panic!("{}: expected resolution error, got {:?}", backend, other),
        }
        assert!(resolver
            .cache()
            .get_cached_info("user123")
            .await
            .unwrap()
            .is_none());

        // Failures are not cached, so the next call queries again
        let _ = resolver.resolve(&CallerContext::authenticated("user123")).await;
        assert_eq!(discoverer.calls(), 2, "{}", backend);
    }
}

#[tokio::test]
async fn test_error_message_carries_original_cause() {
    let dir = tempdir().unwrap();
    let (resolver, discoverer) = create_resolver(dir.path(), "memory", 300).await;
    discoverer.fail_with("STUN server unreachable");

    let error = resolver
        .public_ip(&CallerContext::anonymous())
        .await
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "Failed to retrieve STUN info: STUN server unreachable"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identities_resolve_in_parallel() {
    let dir = tempdir().unwrap();
    let (resolver, discoverer) = create_resolver(dir.path(), "file", 300).await;
    let resolver = Arc::new(resolver);

    let mut handles = Vec::new();
    for i in 0..8 {
        let resolver = resolver.clone();
        handles.push(tokio::spawn(async move {
            resolver
                .resolve(&CallerContext::authenticated(format!("user{}", i)))
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(discoverer.calls(), 8);
    for i in 0..8 {
        let identity = format!("user{}", i);
        assert!(resolver
            .cache()
            .get_cached_info(&identity)
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_blocking_discovery_does_not_stall_cache_hits() {
    init_tracing();
    let dir = tempdir().unwrap();
    let cache = ResolutionCache::open("memory", 300, options_in(dir.path(), 10))
        .await
        .unwrap();
    let identities = IdentityResolver::new(&dir.path().join("machine_id"))
        .await
        .unwrap();

    let discovery_started = Arc::new(tokio::sync::Notify::new());
    let signal = discovery_started.clone();
    let slow = move |_: &str, _: u16, _: &str, _: u16| -> anyhow::Result<Discovery> {
        signal.notify_one();
        std::thread::sleep(Duration::from_millis(300));
        Ok(Discovery {
            nat_type: "Symmetric".to_string(),
            ip: "203.0.113.9".to_string(),
            port: 40000,
        })
    };
    let resolver = Arc::new(StunResolver::new(cache, identities, slow));

    let seeded = ResolutionRecord::new("cached_user", "198.51.100.2", 55555, "Full Cone").unwrap();
    resolver.cache().cache_info(&seeded).await.unwrap();

    let begin = Instant::now();
    let slow_resolver = resolver.clone();
    let slow_task = tokio::spawn(async move {
        slow_resolver
            .resolve(&CallerContext::authenticated("slow_user"))
            .await
    });
    discovery_started.notified().await;

    let record = resolver
        .resolve(&CallerContext::authenticated("cached_user"))
        .await
        .unwrap();
    let elapsed = begin.elapsed();

    assert_eq!(record.ip, "198.51.100.2");
    assert!(
        elapsed < Duration::from_millis(200),
        "cache hit waited {:?} behind discovery",
        elapsed
    );
    assert!(!slow_task.is_finished());

    let slow_record = slow_task.await.unwrap().unwrap();
    assert_eq!(slow_record.ip, "203.0.113.9");
}

#[tokio::test]
async fn test_machine_identity_shared_across_resolvers() {
    let dir = tempdir().unwrap();
    let (first, discoverer) = create_resolver(dir.path(), "file", 300).await;
    first.resolve(&CallerContext::anonymous()).await.unwrap();

    // A second process on the same host reuses the persisted identity and cache
    let (second, second_discoverer) = create_resolver(dir.path(), "file", 300).await;
    let record = second.resolve(&CallerContext::anonymous()).await.unwrap();

    assert_eq!(
        record.identity,
        first.identities().machine_identity().id()
    );
    assert_eq!(discoverer.calls(), 1);
    assert_eq!(second_discoverer.calls(), 0);
}
